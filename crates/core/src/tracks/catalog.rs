use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::{
    page::{PageState, parse_json_prefix},
    types::SubtitleTrack,
};

const CAPTION_TRACKS_KEY: &str = "\"captionTracks\":";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCaptionTrack {
    language_code: String,
    base_url: String,
    name: Option<RawTrackName>,
    #[serde(default)]
    is_translatable: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTrackName {
    simple_text: Option<String>,
}

impl From<RawCaptionTrack> for SubtitleTrack {
    fn from(raw: RawCaptionTrack) -> Self {
        let display_name = raw
            .name
            .and_then(|n| n.simple_text)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| raw.language_code.clone());

        SubtitleTrack {
            language_code: raw.language_code,
            display_name,
            source_url: raw.base_url,
            translatable: raw.is_translatable,
        }
    }
}

/// Lists the subtitle tracks the page offers.
///
/// Strategies run in order against the same snapshot and the first non-empty
/// result wins; results are never merged. No tracks is an empty vector.
pub fn discover_tracks(page: &PageState) -> Vec<SubtitleTrack> {
    let strategies: [(&str, fn(&PageState) -> Vec<SubtitleTrack>); 2] = [
        ("player_response", from_player_response),
        ("inline_scripts", from_inline_scripts),
    ];

    for (name, strategy) in strategies {
        let tracks = strategy(page);
        if !tracks.is_empty() {
            debug!(strategy = name, count = tracks.len(), "Discovered subtitle tracks");
            return tracks;
        }
    }

    debug!("No subtitle tracks on page");
    Vec::new()
}

fn from_player_response(page: &PageState) -> Vec<SubtitleTrack> {
    page.player_response()
        .map(|pr| parse_tracks(&pr["captions"]["playerCaptionsTracklistRenderer"]["captionTracks"]))
        .unwrap_or_default()
}

fn from_inline_scripts(page: &PageState) -> Vec<SubtitleTrack> {
    for script in page.inline_scripts.iter().filter(|s| s.contains("captionTracks")) {
        for (pos, _) in script.match_indices(CAPTION_TRACKS_KEY) {
            let rest = &script[pos + CAPTION_TRACKS_KEY.len()..];
            let Some(array) = parse_json_prefix(rest).filter(Value::is_array) else {
                debug!("Unparseable captionTracks payload, skipping");
                continue;
            };
            let tracks = parse_tracks(&array);
            if !tracks.is_empty() {
                return tracks;
            }
        }
    }
    Vec::new()
}

fn parse_tracks(value: &Value) -> Vec<SubtitleTrack> {
    let Some(entries) = value.as_array() else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| serde_json::from_value::<RawCaptionTrack>(entry.clone()).ok())
        .map(SubtitleTrack::from)
        .collect()
}
