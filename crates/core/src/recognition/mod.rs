//! Speech recognition backends.
//!
//! Both backends honor the same contract, [`Recognizer::recognize`]; the
//! emptiness check lives in [`recognize_text`] so neither backend has to
//! repeat it.

pub mod streaming;
pub mod transcriber;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

pub use streaming::*;
pub use transcriber::*;

use crate::{
    error::{KratkoError, Result},
    types::RecognitionBackend,
};

pub const DEFAULT_RECOGNITION_LANGUAGE: &str = "zh-CN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpeechLanguage {
    pub code: &'static str,
    pub name: &'static str,
}

pub const SUPPORTED_LANGUAGES: [SpeechLanguage; 11] = [
    SpeechLanguage { code: "zh-CN", name: "中文（简体）" },
    SpeechLanguage { code: "zh-TW", name: "中文（繁体）" },
    SpeechLanguage { code: "en-US", name: "English (US)" },
    SpeechLanguage { code: "en-GB", name: "English (UK)" },
    SpeechLanguage { code: "ja-JP", name: "日本語" },
    SpeechLanguage { code: "ko-KR", name: "한국어" },
    SpeechLanguage { code: "es-ES", name: "Español" },
    SpeechLanguage { code: "fr-FR", name: "Français" },
    SpeechLanguage { code: "de-DE", name: "Deutsch" },
    SpeechLanguage { code: "ru-RU", name: "Русский" },
    SpeechLanguage { code: "pt-BR", name: "Português (Brasil)" },
];

#[async_trait]
pub trait Recognizer: Send + Sync {
    fn backend(&self) -> RecognitionBackend;

    /// Listens for at most `duration` and returns whatever was recognized.
    async fn recognize(&self, duration: Duration, language_hint: Option<&str>) -> Result<String>;
}

/// Runs `recognizer` and rejects an empty or whitespace-only result.
pub async fn recognize_text(
    recognizer: &dyn Recognizer,
    duration: Duration,
    language_hint: Option<&str>,
) -> Result<String> {
    let text = recognizer.recognize(duration, language_hint).await?;
    let text = text.trim();
    if text.is_empty() {
        return Err(KratkoError::EmptyRecognition);
    }
    Ok(text.to_string())
}
