use serde_json::{Value, json};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KratkoError {
    #[error("No video id found, open a YouTube video page first")]
    NoVideoId,

    #[error("This video has no subtitles")]
    NoSubtitleTracks,

    #[error("No suitable subtitle track found")]
    NoSuitableTrack,

    #[error("Failed to fetch subtitle content: {reason}")]
    FetchFailed { reason: String },

    #[error("No video element found on the page")]
    NoVideoElement,

    #[error("Play the video first")]
    VideoPaused,

    #[error("Speech recognition is not supported here")]
    Unsupported,

    #[error("Audio capture is not supported by this media element")]
    AudioCaptureUnsupported,

    #[error("The media stream has no audio track")]
    NoAudioTrack,

    #[error("Invalid recording duration: {value} seconds")]
    InvalidDuration { value: f64 },

    #[error("Recording error: {reason}")]
    RecordingError { reason: String },

    #[error("Another capture or recognition session is already active")]
    CaptureInProgress,

    #[error("Speech recognition error: {code}")]
    RecognitionError { code: String },

    #[error("No speech was recognized, make sure the video is playing with sound")]
    EmptyRecognition,

    #[error("Transcription failed: {status} - {message}")]
    TranscriptionFailed { status: u16, message: String },

    #[error("Configure an API key in the settings first")]
    MissingApiKey,

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("API request failed: {status} - {message}")]
    ApiRequestFailed { status: u16, message: String },

    #[error("Invalid API response: {reason}")]
    InvalidResponse { reason: String },

    #[error("Could not communicate with the {context} context, reload the page and retry")]
    CommunicationFailed { context: &'static str },

    #[error("An acquisition is already in progress")]
    AcquisitionInProgress,

    #[error("{message}")]
    Remote { code: String, message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid audio payload: {0}")]
    Base64Error(#[from] base64::DecodeError),

    #[error("Audio encoding failed: {0}")]
    WavError(#[from] hound::Error),
}

impl KratkoError {
    /// Stable snake_case code carried in the `error` field of wire failures.
    pub fn code(&self) -> &str {
        match self {
            KratkoError::NoVideoId => "no_video_id",
            KratkoError::NoSubtitleTracks => "no_subtitles",
            KratkoError::NoSuitableTrack => "no_suitable_track",
            KratkoError::FetchFailed { .. } => "fetch_failed",
            KratkoError::NoVideoElement => "no_video_element",
            KratkoError::VideoPaused => "video_paused",
            KratkoError::Unsupported => "unsupported",
            KratkoError::AudioCaptureUnsupported => "audio_capture_unsupported",
            KratkoError::NoAudioTrack => "no_audio_track",
            KratkoError::InvalidDuration { .. } => "invalid_duration",
            KratkoError::RecordingError { .. } => "recording_error",
            KratkoError::CaptureInProgress => "capture_in_progress",
            KratkoError::RecognitionError { .. } => "recognition_error",
            KratkoError::EmptyRecognition => "empty_recognition",
            KratkoError::TranscriptionFailed { .. } => "transcription_failed",
            KratkoError::MissingApiKey => "missing_api_key",
            KratkoError::InvalidConfig { .. } => "invalid_config",
            KratkoError::ApiRequestFailed { .. } => "api_request_failed",
            KratkoError::InvalidResponse { .. } => "invalid_response",
            KratkoError::CommunicationFailed { .. } => "communication_failed",
            KratkoError::AcquisitionInProgress => "acquisition_in_progress",
            KratkoError::Remote { code, .. } => code,
            KratkoError::IoError(_) => "io_error",
            KratkoError::JsonError(_) => "json_error",
            KratkoError::HttpError(_) => "http_error",
            KratkoError::Base64Error(_) => "invalid_audio_payload",
            KratkoError::WavError(_) => "audio_encoding_failed",
        }
    }

    /// Serializes the error as a `{success: false, error, message}` response.
    pub fn to_wire(&self) -> Value {
        json!({
            "success": false,
            "error": self.code(),
            "message": self.to_string(),
        })
    }

    /// Rebuilds an error received from another context.
    pub fn from_wire(value: &Value) -> Self {
        let code = value["error"].as_str().unwrap_or("unknown").to_string();
        let message = value["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| code.clone());

        match code.as_str() {
            "no_subtitles" => KratkoError::NoSubtitleTracks,
            "missing_api_key" => KratkoError::MissingApiKey,
            "empty_recognition" => KratkoError::EmptyRecognition,
            "capture_in_progress" => KratkoError::CaptureInProgress,
            _ => KratkoError::Remote { code, message },
        }
    }
}

pub type Result<T> = std::result::Result<T, KratkoError>;

/// Message for a failed upstream call: the provider's `error.message` when
/// the body carries one, else the canonical reason of `status`.
pub(crate) fn upstream_message(status: reqwest::StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Unknown error")
                .to_string()
        })
}
