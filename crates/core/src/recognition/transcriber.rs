use reqwest::multipart::{Form, Part};
use tracing::{debug, info};

use crate::{
    audio::AudioBlob,
    error::{KratkoError, Result, upstream_message},
};

pub const DEFAULT_TRANSCRIPTION_ENDPOINT: &str = "https://api.openai.com/v1/audio/transcriptions";
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Batch backend: uploads a finished recording to a remote
/// transcription endpoint and returns the plain-text result.
#[derive(Clone)]
pub struct Transcriber {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl Transcriber {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    pub async fn transcribe(&self, blob: &AudioBlob) -> Result<String> {
        if self.api_key.trim().is_empty() {
            return Err(KratkoError::MissingApiKey);
        }

        let file = Part::bytes(blob.data.clone())
            .file_name(blob.file_name())
            .mime_str(&blob.mime_type)?;
        let form = Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("response_format", "text");

        debug!(
            endpoint = self.endpoint.as_str(),
            bytes = blob.data.len(),
            "Uploading audio for transcription"
        );
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(KratkoError::TranscriptionFailed {
                status: status.as_u16(),
                message: upstream_message(status, &body),
            });
        }

        info!(chars = body.len(), "Transcription finished");
        Ok(body)
    }
}
