use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    bus::{ContextId, MessageBus},
    error::{KratkoError, Result},
    recognition::{Recognizer, recognize_text},
    summary::CONNECTION_TEST_TEXT,
    types::{RecognitionBackend, Transcript, VideoContext},
};

/// Language label passed to the summarizer for recognized speech.
pub const RECOGNIZED_SPEECH_LANGUAGE: &str = "speech recognition";

#[derive(Debug, Clone, Default, PartialEq)]
pub enum AcquisitionState {
    #[default]
    Idle,
    ExtractingSubtitles,
    CapturingAudio,
    Recognizing,
    Summarizing,
    /// Terminal: the video has no subtitles. Audio is never started from here.
    NoSubtitles,
    Error(String),
    Done,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    pub state: AcquisitionState,
    pub percent: u8,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct Outcome {
    pub summary: String,
    /// One line describing where the text came from.
    pub info: String,
    pub video: VideoContext,
    /// Set on the subtitle path.
    pub transcript: Option<Transcript>,
}

#[derive(Debug, Clone)]
pub enum Acquisition {
    Summarized(Outcome),
    NoSubtitles,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageStatus {
    pub is_video_page: bool,
    pub video_id: Option<String>,
}

/// UI-side driver of the acquisition pipeline. Talks to the page and the
/// coordinator only through the bus and publishes progress on a watch
/// channel. Its only cross-request state is the in-flight flag.
pub struct AcquisitionOrchestrator {
    bus: MessageBus,
    progress: watch::Sender<Progress>,
    in_flight: AtomicBool,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl AcquisitionOrchestrator {
    pub fn new(bus: MessageBus) -> Self {
        let (progress, _) = watch::channel(Progress::default());
        Self {
            bus,
            progress,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    pub fn state(&self) -> AcquisitionState {
        self.progress.borrow().state.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn begin(&self) -> Result<InFlight<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| KratkoError::AcquisitionInProgress)?;
        Ok(InFlight(&self.in_flight))
    }

    fn report(&self, state: AcquisitionState, percent: u8, text: impl Into<String>) {
        let text = text.into();
        debug!(?state, percent, text = text.as_str(), "Progress");
        self.progress.send_replace(Progress {
            state,
            percent,
            text,
        });
    }

    fn fail<T>(&self, err: KratkoError) -> Result<T> {
        warn!(code = err.code(), "Acquisition failed: {err}");
        self.report(AcquisitionState::Error(err.to_string()), 0, err.to_string());
        Err(err)
    }

    /// Sends a request and unwraps the `{success:false}` failure shape.
    async fn request(&self, target: ContextId, action: &str, payload: Value) -> Result<Value> {
        let reply = self
            .bus
            .send(target, action, payload)
            .await
            .ok_or(KratkoError::CommunicationFailed {
                context: target.name(),
            })?;
        if reply["success"] == json!(false) {
            return Err(KratkoError::from_wire(&reply));
        }
        Ok(reply)
    }

    async fn summarize(&self, text: &str, video: &VideoContext, language: &str) -> Result<String> {
        let reply = self
            .request(
                ContextId::Coordinator,
                "generateSummary",
                json!({ "text": text, "videoInfo": video, "language": language }),
            )
            .await?;
        reply["summary"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| KratkoError::InvalidResponse {
                reason: "summary reply without text".to_string(),
            })
    }

    pub async fn page_status(&self) -> Result<PageStatus> {
        let reply = self.request(ContextId::Page, "checkPage", json!({})).await?;
        Ok(PageStatus {
            is_video_page: reply["isVideoPage"].as_bool().unwrap_or(false),
            video_id: reply["videoId"].as_str().map(str::to_string),
        })
    }

    /// Subtitle path: extract, then summarize. A video without subtitles
    /// ends in [`AcquisitionState::NoSubtitles`] rather than an error.
    pub async fn extract_and_summarize(&self) -> Result<Acquisition> {
        let _in_flight = self.begin()?;
        match self.subtitle_path().await {
            Ok(acquisition) => Ok(acquisition),
            Err(e) => self.fail(e),
        }
    }

    async fn subtitle_path(&self) -> Result<Acquisition> {
        self.report(AcquisitionState::ExtractingSubtitles, 20, "Extracting subtitles...");

        let reply = match self
            .request(ContextId::Page, "extractSubtitles", json!({}))
            .await
        {
            Ok(reply) => reply,
            Err(KratkoError::NoSubtitleTracks) => {
                info!("No subtitles, waiting for the user to choose audio recognition");
                self.report(AcquisitionState::NoSubtitles, 0, "This video has no subtitles");
                return Ok(Acquisition::NoSubtitles);
            }
            Err(e) => return Err(e),
        };

        let transcript: Transcript = serde_json::from_value(reply.clone())?;
        let video: VideoContext = serde_json::from_value(reply["videoInfo"].clone()).unwrap_or_default();
        let language = if transcript.language_name().is_empty() {
            transcript.language()
        } else {
            transcript.language_name()
        }
        .to_string();

        self.report(
            AcquisitionState::Summarizing,
            50,
            "Subtitles extracted, generating summary...",
        );
        let summary = self.summarize(transcript.full_text(), &video, &language).await?;

        self.report(AcquisitionState::Done, 100, "Done");
        let info = format!(
            "Subtitle language: {language} | Subtitle length: {} characters",
            transcript.full_text().chars().count()
        );
        Ok(Acquisition::Summarized(Outcome {
            summary,
            info,
            video,
            transcript: Some(transcript),
        }))
    }

    /// Audio path: recognize `duration` of playing media with `backend`,
    /// then summarize. Only ever started on explicit request.
    pub async fn recognize_and_summarize(
        &self,
        duration: Duration,
        backend: RecognitionBackend,
        language: Option<&str>,
    ) -> Result<Outcome> {
        let _in_flight = self.begin()?;
        match self.audio_path(duration, backend, language).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => self.fail(e),
        }
    }

    async fn audio_path(
        &self,
        duration: Duration,
        backend: RecognitionBackend,
        language: Option<&str>,
    ) -> Result<Outcome> {
        let secs = duration.as_secs_f64();
        let text = match backend {
            RecognitionBackend::Streaming => {
                self.report(
                    AcquisitionState::Recognizing,
                    10,
                    format!("Recognizing with {} ({secs}s)...", backend.name()),
                );
                recognize_text(&StreamingOverBus { owner: self }, duration, language).await?
            }
            RecognitionBackend::Batch => {
                self.report(
                    AcquisitionState::CapturingAudio,
                    10,
                    format!("Recording audio ({secs}s)..."),
                );
                recognize_text(&BatchOverBus { owner: self }, duration, language).await?
            }
        };

        self.report(AcquisitionState::Summarizing, 70, "Generating summary...");
        // missing video info is not fatal here
        let video = match self.request(ContextId::Page, "getVideoInfo", json!({})).await {
            Ok(reply) => serde_json::from_value(reply["videoInfo"].clone()).unwrap_or_default(),
            Err(e) => {
                debug!("Video info unavailable: {e}");
                VideoContext::default()
            }
        };
        let summary = self
            .summarize(&text, &video, RECOGNIZED_SPEECH_LANGUAGE)
            .await?;

        self.report(AcquisitionState::Done, 100, "Done");
        let info = format!(
            "Source: {} ({secs}s) | Recognized text length: {} characters",
            backend.name(),
            text.chars().count()
        );
        Ok(Outcome {
            summary,
            info,
            video,
            transcript: None,
        })
    }

    /// Ends an ongoing capture or recognition early. `false` when nothing
    /// was running.
    pub async fn stop_recognition(&self, backend: RecognitionBackend) -> bool {
        let action = match backend {
            RecognitionBackend::Streaming => "stopStreamingRecognition",
            RecognitionBackend::Batch => "stopAudioCapture",
        };
        match self.request(ContextId::Page, action, json!({})).await {
            Ok(reply) => reply["success"].as_bool().unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Sends a short fixed sample through the configured provider.
    pub async fn test_connection(&self) -> Result<String> {
        let video = VideoContext {
            title: Some("API connection test".to_string()),
            ..Default::default()
        };
        self.summarize(CONNECTION_TEST_TEXT, &video, "english").await
    }

    pub async fn settings(&self) -> Result<Value> {
        self.request(ContextId::Coordinator, "getConfig", json!({}))
            .await
    }

    pub async fn save_settings(&self, patch: Value) -> Result<()> {
        self.request(ContextId::Coordinator, "saveConfig", json!({ "config": patch }))
            .await?;
        Ok(())
    }

    pub async fn streaming_support(&self) -> Result<Value> {
        self.request(ContextId::Page, "checkStreamingSupport", json!({}))
            .await
    }
}

/// Streaming backend as seen from the UI: the page runs the session.
struct StreamingOverBus<'a> {
    owner: &'a AcquisitionOrchestrator,
}

#[async_trait]
impl<'a> Recognizer for StreamingOverBus<'a> {
    fn backend(&self) -> RecognitionBackend {
        RecognitionBackend::Streaming
    }

    async fn recognize(&self, duration: Duration, language_hint: Option<&str>) -> Result<String> {
        let reply = self
            .owner
            .request(
                ContextId::Page,
                "startStreamingRecognition",
                json!({ "duration": duration.as_secs_f64(), "language": language_hint }),
            )
            .await?;
        Ok(reply["text"].as_str().unwrap_or_default().to_string())
    }
}

/// Batch backend as seen from the UI: the page records, the coordinator
/// transcribes.
struct BatchOverBus<'a> {
    owner: &'a AcquisitionOrchestrator,
}

#[async_trait]
impl<'a> Recognizer for BatchOverBus<'a> {
    fn backend(&self) -> RecognitionBackend {
        RecognitionBackend::Batch
    }

    async fn recognize(&self, duration: Duration, _language_hint: Option<&str>) -> Result<String> {
        let audio = self
            .owner
            .request(
                ContextId::Page,
                "startAudioCapture",
                json!({ "duration": duration.as_secs_f64() }),
            )
            .await?;

        self.owner
            .report(AcquisitionState::Recognizing, 40, "Transcribing audio...");
        let reply = self
            .owner
            .request(
                ContextId::Coordinator,
                "transcribeAudio",
                json!({ "audioData": audio["audioData"], "mimeType": audio["mimeType"] }),
            )
            .await?;
        Ok(reply["text"].as_str().unwrap_or_default().to_string())
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast;

    use super::*;
    use crate::bus::{Dispatch, Endpoint};

    type Script = Vec<(&'static str, Value)>;

    /// Scripted stand-ins answering each action with a fixed reply.
    struct PageStub(Script);
    struct CoordinatorStub(Script);

    fn lookup(script: &Script, action: &str) -> Dispatch {
        match script.iter().find(|(a, _)| *a == action) {
            Some((_, value)) => Dispatch::Immediate(value.clone()),
            None => Dispatch::Ignored,
        }
    }

    impl Endpoint for PageStub {
        const CONTEXT: ContextId = ContextId::Page;
        fn dispatch(&self, action: &str, _payload: Value) -> Dispatch {
            lookup(&self.0, action)
        }
    }

    impl Endpoint for CoordinatorStub {
        const CONTEXT: ContextId = ContextId::Coordinator;
        fn dispatch(&self, action: &str, _payload: Value) -> Dispatch {
            lookup(&self.0, action)
        }
    }

    fn wire(
        page: Script,
        coordinator: Option<Script>,
    ) -> (AcquisitionOrchestrator, broadcast::Sender<()>) {
        let bus = MessageBus::new();
        let (shutdown, _) = broadcast::channel(1);
        bus.serve(PageStub(page), shutdown.subscribe());
        if let Some(script) = coordinator {
            bus.serve(CoordinatorStub(script), shutdown.subscribe());
        }
        (AcquisitionOrchestrator::new(bus), shutdown)
    }

    fn subtitles() -> Value {
        json!({
            "success": true,
            "videoId": "v",
            "videoInfo": {"videoId": "v", "title": "Talk", "author": "A"},
            "language": "english",
            "languageName": "English",
            "subtitles": [{"start": 0.0, "duration": 1.0, "text": "hello world"}],
            "fullText": "hello world",
        })
    }

    #[tokio::test]
    async fn subtitle_path_reaches_done() {
        let (orchestrator, _shutdown) = wire(
            vec![("extractSubtitles", subtitles())],
            Some(vec![("generateSummary", json!({"success": true, "summary": "S"}))]),
        );

        let Acquisition::Summarized(outcome) = orchestrator.extract_and_summarize().await.unwrap()
        else {
            panic!("expected a summary");
        };
        assert_eq!(outcome.summary, "S");
        assert_eq!(
            outcome.info,
            "Subtitle language: English | Subtitle length: 11 characters"
        );
        assert_eq!(outcome.video.title.as_deref(), Some("Talk"));
        assert_eq!(orchestrator.state(), AcquisitionState::Done);
        assert_eq!(orchestrator.subscribe().borrow().percent, 100);
        assert!(!orchestrator.is_busy());
    }

    #[tokio::test]
    async fn no_subtitles_is_terminal_and_not_an_error() {
        let (orchestrator, _shutdown) = wire(
            vec![(
                "extractSubtitles",
                json!({"success": false, "error": "no_subtitles", "message": "none"}),
            )],
            None,
        );

        let acquisition = orchestrator.extract_and_summarize().await.unwrap();
        assert!(matches!(acquisition, Acquisition::NoSubtitles));
        assert_eq!(orchestrator.state(), AcquisitionState::NoSubtitles);
    }

    #[tokio::test]
    async fn summary_failure_keeps_the_upstream_message() {
        let (orchestrator, _shutdown) = wire(
            vec![("extractSubtitles", subtitles())],
            Some(vec![(
                "generateSummary",
                json!({
                    "success": false,
                    "error": "api_request_failed",
                    "message": "API request failed: 401 - bad key",
                }),
            )]),
        );

        let err = orchestrator.extract_and_summarize().await.unwrap_err();
        assert_eq!(err.code(), "api_request_failed");
        assert_eq!(
            orchestrator.state(),
            AcquisitionState::Error("API request failed: 401 - bad key".into())
        );
    }

    #[tokio::test]
    async fn unreachable_coordinator_is_a_communication_failure() {
        let (orchestrator, _shutdown) = wire(vec![("extractSubtitles", subtitles())], None);

        let err = orchestrator.extract_and_summarize().await.unwrap_err();
        assert!(matches!(
            err,
            KratkoError::CommunicationFailed {
                context: "coordinator"
            }
        ));
    }

    #[tokio::test]
    async fn empty_recognition_never_reaches_the_summarizer() {
        let (orchestrator, _shutdown) = wire(
            vec![(
                "startStreamingRecognition",
                json!({"success": true, "text": "   "}),
            )],
            None,
        );

        let err = orchestrator
            .recognize_and_summarize(Duration::from_secs(5), RecognitionBackend::Streaming, None)
            .await
            .unwrap_err();
        assert!(matches!(err, KratkoError::EmptyRecognition));
        assert!(matches!(orchestrator.state(), AcquisitionState::Error(_)));
    }

    /// Page answering streaming requests with the window it was asked for.
    struct EchoWindowPage;

    impl Endpoint for EchoWindowPage {
        const CONTEXT: ContextId = ContextId::Page;
        fn dispatch(&self, action: &str, payload: Value) -> Dispatch {
            match action {
                "startStreamingRecognition" => Dispatch::Immediate(json!({
                    "success": true,
                    "text": format!("window {}", payload["duration"]),
                })),
                _ => Dispatch::Ignored,
            }
        }
    }

    #[tokio::test]
    async fn fractional_window_reaches_the_page_unrounded() {
        let bus = MessageBus::new();
        let (shutdown, _) = broadcast::channel(1);
        bus.serve(EchoWindowPage, shutdown.subscribe());
        bus.serve(
            CoordinatorStub(vec![("generateSummary", json!({"success": true, "summary": "S"}))]),
            shutdown.subscribe(),
        );
        let orchestrator = AcquisitionOrchestrator::new(bus);

        let outcome = orchestrator
            .recognize_and_summarize(Duration::from_millis(1500), RecognitionBackend::Streaming, None)
            .await
            .unwrap();
        assert_eq!(
            outcome.info,
            "Source: Web Speech (1.5s) | Recognized text length: 10 characters"
        );
    }

    #[tokio::test]
    async fn batch_path_captures_then_transcribes() {
        let (orchestrator, _shutdown) = wire(
            vec![
                (
                    "startAudioCapture",
                    json!({"success": true, "audioData": "AAAA", "mimeType": "audio/webm"}),
                ),
                ("getVideoInfo", json!({"success": true, "videoInfo": {"title": "T"}})),
            ],
            Some(vec![
                ("transcribeAudio", json!({"success": true, "text": " spoken words "})),
                ("generateSummary", json!({"success": true, "summary": "S2"})),
            ]),
        );

        let outcome = orchestrator
            .recognize_and_summarize(Duration::from_secs(30), RecognitionBackend::Batch, None)
            .await
            .unwrap();
        assert_eq!(outcome.summary, "S2");
        assert_eq!(
            outcome.info,
            "Source: Whisper API (30s) | Recognized text length: 12 characters"
        );
        assert_eq!(outcome.video.title.as_deref(), Some("T"));
        assert!(outcome.transcript.is_none());
    }
}
