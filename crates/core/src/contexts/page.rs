use std::{sync::Arc, time::Duration};

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::{
    audio::{AudioSession, CaptureSlot, MediaHost},
    bus::{ContextId, Dispatch, Endpoint, MessageBus},
    contexts::respond,
    error::{KratkoError, Result},
    page::PageSource,
    recognition::{DEFAULT_RECOGNITION_LANGUAGE, SUPPORTED_LANGUAGES, SpeechEngine, StreamingRecognizer},
    tracks::{discover_tracks, select},
    transcript,
};

pub const DEFAULT_CAPTURE_SECONDS: f64 = 60.0;

fn default_duration() -> f64 {
    DEFAULT_CAPTURE_SECONDS
}

/// Window length in seconds; fractions are kept.
fn window(seconds: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(seconds).map_err(|_| KratkoError::InvalidDuration { value: seconds })
}

#[derive(Deserialize)]
struct CaptureRequest {
    #[serde(default = "default_duration")]
    duration: f64,
}

#[derive(Deserialize)]
struct StreamingRequest {
    #[serde(default = "default_duration")]
    duration: f64,
    #[serde(default)]
    language: Option<String>,
}

/// Extractor living next to the page: reads page state, fetches subtitles,
/// and owns the media capture and recognition sessions of that page.
#[derive(Clone)]
pub struct PageAgent {
    inner: Arc<PageAgentInner>,
}

struct PageAgentInner {
    source: Arc<dyn PageSource>,
    client: reqwest::Client,
    audio: AudioSession,
    streaming: StreamingRecognizer,
}

impl PageAgent {
    pub fn new(
        source: Arc<dyn PageSource>,
        media: Arc<dyn MediaHost>,
        engine: Option<Arc<dyn SpeechEngine>>,
        client: reqwest::Client,
    ) -> Self {
        let slot = CaptureSlot::new();
        Self {
            inner: Arc::new(PageAgentInner {
                source,
                client,
                audio: AudioSession::new(Arc::clone(&media), slot.clone()),
                streaming: StreamingRecognizer::new(engine, media, slot),
            }),
        }
    }

    /// Tells the coordinator a video page finished loading.
    pub async fn announce(&self, bus: &MessageBus) {
        let video_id = self.inner.source.snapshot().video_id();
        if video_id.is_some() {
            bus.send(ContextId::Coordinator, "pageLoaded", json!({ "videoId": video_id }))
                .await;
        }
    }

    fn check_page(&self) -> Value {
        let video_id = self.inner.source.snapshot().video_id();
        json!({
            "isVideoPage": video_id.is_some(),
            "videoId": video_id,
        })
    }

    fn video_info(&self) -> Result<Value> {
        let page = self.inner.source.snapshot();
        let video_id = page.video_id().ok_or(KratkoError::NoVideoId)?;
        Ok(json!({
            "success": true,
            "videoId": video_id,
            "videoInfo": page.video_context(),
        }))
    }

    /// Discovers, selects and fetches one subtitle track of the current page.
    pub async fn extract_subtitles(&self) -> Result<Value> {
        let page = self.inner.source.snapshot();
        let video_id = page.video_id().ok_or(KratkoError::NoVideoId)?;

        let tracks = discover_tracks(&page);
        if tracks.is_empty() {
            info!(video_id = video_id.as_str(), "Video has no subtitle tracks");
            return Err(KratkoError::NoSubtitleTracks);
        }
        let selected = select(&tracks).ok_or(KratkoError::NoSuitableTrack)?;
        debug!(
            code = selected.track.language_code.as_str(),
            label = %selected.language,
            "Selected subtitle track"
        );

        let transcript = transcript::fetch(&self.inner.client, &selected).await?;
        if transcript.is_empty() {
            return Err(KratkoError::FetchFailed {
                reason: "subtitle track contains no text".to_string(),
            });
        }

        let mut reply = json!(transcript);
        reply["success"] = json!(true);
        reply["videoId"] = json!(video_id);
        reply["videoInfo"] = json!(page.video_context());
        reply["availableTracks"] = tracks
            .iter()
            .map(|t| json!({ "languageCode": t.language_code, "name": t.display_name }))
            .collect();
        Ok(reply)
    }

    async fn capture_audio(&self, request: CaptureRequest) -> Result<Value> {
        let blob = self
            .inner
            .audio
            .capture(window(request.duration)?)
            .await?;
        Ok(json!({
            "success": true,
            "audioData": blob.to_base64(),
            "mimeType": blob.mime_type,
        }))
    }

    async fn recognize_streaming(&self, request: StreamingRequest) -> Result<Value> {
        let duration = window(request.duration)?;
        let language = request
            .language
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_RECOGNITION_LANGUAGE.to_string());
        let text = self
            .inner
            .streaming
            .run(duration, &language)
            .await?;
        Ok(json!({ "success": true, "text": text }))
    }
}

impl Endpoint for PageAgent {
    const CONTEXT: ContextId = ContextId::Page;

    fn dispatch(&self, action: &str, payload: Value) -> Dispatch {
        match action {
            "checkPage" => Dispatch::Immediate(self.check_page()),
            "getVideoInfo" => Dispatch::Immediate(respond(self.video_info())),
            "extractSubtitles" => {
                let agent = self.clone();
                Dispatch::deferred(async move { respond(agent.extract_subtitles().await) })
            }
            "startAudioCapture" => {
                let agent = self.clone();
                Dispatch::deferred(async move {
                    let request = serde_json::from_value(payload).map_err(KratkoError::from);
                    match request {
                        Ok(request) => respond(agent.capture_audio(request).await),
                        Err(e) => e.to_wire(),
                    }
                })
            }
            "stopAudioCapture" => {
                Dispatch::Immediate(json!({ "success": self.inner.audio.stop() }))
            }
            "startStreamingRecognition" => {
                let agent = self.clone();
                Dispatch::deferred(async move {
                    let request = serde_json::from_value(payload).map_err(KratkoError::from);
                    match request {
                        Ok(request) => respond(agent.recognize_streaming(request).await),
                        Err(e) => e.to_wire(),
                    }
                })
            }
            "stopStreamingRecognition" => {
                Dispatch::Immediate(json!({ "success": self.inner.streaming.stop() }))
            }
            "checkStreamingSupport" => Dispatch::Immediate(json!({
                "supported": self.inner.streaming.is_supported(),
                "languages": SUPPORTED_LANGUAGES,
            })),
            _ => Dispatch::Ignored,
        }
    }
}
