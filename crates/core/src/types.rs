use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Read-only snapshot of the video the page is showing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoContext {
    #[serde(default)]
    pub video_id: String,
    pub title: Option<String>,
    pub author: Option<String>,
    #[serde(rename = "lengthSeconds")]
    pub duration_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleTrack {
    pub language_code: String,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(rename = "baseUrl")]
    pub source_url: String,
    #[serde(rename = "isTranslatable")]
    pub translatable: bool,
}

impl SubtitleTrack {
    pub fn same_identity(&self, other: &SubtitleTrack) -> bool {
        self.language_code == other.language_code && self.source_url == other.source_url
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleSegment {
    #[serde(rename = "start")]
    pub start_seconds: f64,
    #[serde(rename = "duration")]
    pub duration_seconds: f64,
    pub text: String,
}

/// Ordered subtitle segments plus their joined text.
///
/// `full_text` is computed once, in [`Transcript::new`]. Deserialization goes
/// through the same constructor, so a `fullText` on the wire is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "TranscriptWire")]
pub struct Transcript {
    language: String,
    language_name: String,
    #[serde(rename = "subtitles")]
    segments: Vec<SubtitleSegment>,
    full_text: String,
}

impl Transcript {
    pub fn new(
        language: impl Into<String>,
        language_name: impl Into<String>,
        segments: Vec<SubtitleSegment>,
    ) -> Self {
        let segments: Vec<SubtitleSegment> = segments
            .into_iter()
            .filter_map(|seg| {
                let text = seg.text.trim();
                if text.is_empty() {
                    None
                } else {
                    Some(SubtitleSegment {
                        text: text.to_string(),
                        ..seg
                    })
                }
            })
            .collect();

        let full_text = segments
            .iter()
            .map(|seg| seg.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        Self {
            language: language.into(),
            language_name: language_name.into(),
            segments,
            full_text,
        }
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn language_name(&self) -> &str {
        &self.language_name
    }

    pub fn segments(&self) -> &[SubtitleSegment] {
        &self.segments
    }

    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranscriptWire {
    language: String,
    #[serde(default)]
    language_name: String,
    #[serde(default)]
    subtitles: Vec<SubtitleSegment>,
}

impl From<TranscriptWire> for Transcript {
    fn from(wire: TranscriptWire) -> Self {
        Transcript::new(wire.language, wire.language_name, wire.subtitles)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecognitionBackend {
    #[serde(rename = "webspeech")]
    Streaming,
    #[serde(rename = "whisper")]
    Batch,
}

impl RecognitionBackend {
    pub fn name(&self) -> &'static str {
        match self {
            RecognitionBackend::Streaming => "Web Speech",
            RecognitionBackend::Batch => "Whisper API",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Capturing,
    Finished,
    Failed,
}

/// Per-invocation bookkeeping for a recognition run.
#[derive(Debug, Clone)]
pub struct RecognitionSession {
    pub backend: RecognitionBackend,
    pub window: Duration,
    pub language_hint: Option<String>,
    pub state: SessionState,
}

impl RecognitionSession {
    pub fn new(
        backend: RecognitionBackend,
        window: Duration,
        language_hint: Option<String>,
    ) -> Self {
        Self {
            backend,
            window,
            language_hint,
            state: SessionState::Idle,
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.state == SessionState::Capturing
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRequest {
    pub text: String,
    #[serde(default)]
    pub video_info: VideoContext,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryResult {
    pub summary: String,
}
