use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::SubtitleTrack;

/// Chinese variants, in preference order.
pub const CHINESE_CODES: [&str; 5] = ["zh", "zh-Hans", "zh-Hant", "zh-CN", "zh-TW"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum TrackLanguage {
    Chinese,
    English,
    Other(String),
}

impl TrackLanguage {
    pub fn label(&self) -> &str {
        match self {
            TrackLanguage::Chinese => "chinese",
            TrackLanguage::English => "english",
            TrackLanguage::Other(code) => code,
        }
    }
}

impl fmt::Display for TrackLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<TrackLanguage> for String {
    fn from(language: TrackLanguage) -> Self {
        language.label().to_string()
    }
}

impl From<String> for TrackLanguage {
    fn from(label: String) -> Self {
        match label.as_str() {
            "chinese" => TrackLanguage::Chinese,
            "english" => TrackLanguage::English,
            _ => TrackLanguage::Other(label),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectedTrack {
    pub track: SubtitleTrack,
    pub language: TrackLanguage,
}

fn is_english(code: &str) -> bool {
    code == "en" || code.starts_with("en-")
}

/// Picks one track: Chinese, then English, then the first discovered.
pub fn select(tracks: &[SubtitleTrack]) -> Option<SelectedTrack> {
    let first = tracks.first()?;

    if let Some(track) = tracks
        .iter()
        .find(|t| CHINESE_CODES.contains(&t.language_code.as_str()))
    {
        return Some(SelectedTrack {
            track: track.clone(),
            language: TrackLanguage::Chinese,
        });
    }

    if let Some(track) = tracks.iter().find(|t| is_english(&t.language_code)) {
        return Some(SelectedTrack {
            track: track.clone(),
            language: TrackLanguage::English,
        });
    }

    Some(SelectedTrack {
        track: first.clone(),
        language: TrackLanguage::Other(first.language_code.clone()),
    })
}
