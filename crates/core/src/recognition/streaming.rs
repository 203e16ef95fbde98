use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::{
    audio::{CaptureSlot, MediaHost, session::close_on_deadline},
    error::{KratkoError, Result},
    recognition::{DEFAULT_RECOGNITION_LANGUAGE, Recognizer},
    types::{RecognitionBackend, RecognitionSession, SessionState},
};

/// Engine errors that do not end a session.
pub const RECOVERABLE_ENGINE_ERRORS: [&str; 2] = ["no-speech", "aborted"];

/// Runs that end without producing a single event before restarts give up.
const MAX_BARREN_RESTARTS: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Result { transcript: String, is_final: bool },
    Error(String),
    /// The engine ended the run on its own.
    End,
}

/// On-device continuous speech recognizer.
pub trait SpeechEngine: Send + Sync {
    /// Starts one continuous run with interim results enabled. The run ends
    /// with [`EngineEvent::End`] or by closing the channel.
    fn start(&self, language: &str) -> std::result::Result<mpsc::Receiver<EngineEvent>, String>;

    fn stop(&self);
}

/// Streaming backend: listens to the playing media through a
/// [`SpeechEngine`] and keeps the engine alive for the whole window.
pub struct StreamingRecognizer {
    engine: Option<Arc<dyn SpeechEngine>>,
    host: Arc<dyn MediaHost>,
    slot: CaptureSlot,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
    state_tx: watch::Sender<SessionState>,
}

impl StreamingRecognizer {
    pub fn new(
        engine: Option<Arc<dyn SpeechEngine>>,
        host: Arc<dyn MediaHost>,
        slot: CaptureSlot,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            engine,
            host,
            slot,
            stop_tx: Mutex::new(None),
            state_tx,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.engine.is_some()
    }

    /// State of the current or most recent session.
    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Finishes the active session early. Only the first of `stop` and the
    /// session deadline has any effect; later calls return `false`.
    pub fn stop(&self) -> bool {
        let stop_tx = self.stop_tx.lock().expect("StreamingRecognizer poisoned").take();
        match stop_tx {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    pub async fn run(&self, duration: Duration, language: &str) -> Result<String> {
        let _guard = self
            .slot
            .try_acquire()
            .ok_or(KratkoError::CaptureInProgress)?;
        let engine = self.engine.as_ref().ok_or(KratkoError::Unsupported)?;
        let element = self
            .host
            .video_element()
            .ok_or(KratkoError::NoVideoElement)?;
        if element.is_paused() {
            return Err(KratkoError::VideoPaused);
        }

        let mut session = RecognitionSession::new(
            RecognitionBackend::Streaming,
            duration,
            Some(language.to_string()),
        );

        let events = engine.start(language).map_err(|e| {
            self.state_tx.send_replace(SessionState::Failed);
            KratkoError::RecognitionError {
                code: format!("start failed: {e}"),
            }
        })?;

        let (stop_tx, stop_rx) = oneshot::channel();
        *self.stop_tx.lock().expect("StreamingRecognizer poisoned") = Some(stop_tx);
        session.state = SessionState::Capturing;
        self.state_tx.send_replace(SessionState::Capturing);
        info!(language, duration_secs = duration.as_secs_f64(), "Streaming recognition started");

        let result = supervise(engine.as_ref(), events, stop_rx, duration, &mut session).await;

        self.stop_tx.lock().expect("StreamingRecognizer poisoned").take();
        engine.stop();
        self.state_tx.send_replace(session.state);
        result
    }
}

#[async_trait]
impl Recognizer for StreamingRecognizer {
    fn backend(&self) -> RecognitionBackend {
        RecognitionBackend::Streaming
    }

    async fn recognize(&self, duration: Duration, language_hint: Option<&str>) -> Result<String> {
        self.run(duration, language_hint.unwrap_or(DEFAULT_RECOGNITION_LANGUAGE))
            .await
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<EngineEvent>>) -> Option<EngineEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Drives one session until the deadline, an early stop, or a fatal error.
/// Runs the engine ends on its own are restarted while still capturing.
async fn supervise(
    engine: &dyn SpeechEngine,
    events: mpsc::Receiver<EngineEvent>,
    mut stop_rx: oneshot::Receiver<()>,
    duration: Duration,
    session: &mut RecognitionSession,
) -> Result<String> {
    let language = session
        .language_hint
        .clone()
        .unwrap_or_else(|| DEFAULT_RECOGNITION_LANGUAGE.to_string());
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);

    let mut events = Some(events);
    let mut transcript = String::new();
    let mut run_had_events = false;
    let mut barren_restarts = 0;

    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => {
                debug!("Recognition stopped early");
                break;
            }
            _ = &mut deadline => {
                let reason = close_on_deadline(&mut stop_rx);
                debug!(?reason, "Recognition window elapsed");
                break;
            }
            event = next_event(&mut events) => match event {
                Some(EngineEvent::Result { transcript: text, is_final }) => {
                    run_had_events = true;
                    if is_final {
                        transcript.push_str(&text);
                        transcript.push(' ');
                    }
                }
                Some(EngineEvent::Error(code)) => {
                    run_had_events = true;
                    if RECOVERABLE_ENGINE_ERRORS.contains(&code.as_str()) {
                        debug!(code = code.as_str(), "Ignoring recoverable engine error");
                        continue;
                    }
                    warn!(code = code.as_str(), "Speech recognition failed");
                    session.state = SessionState::Failed;
                    return Err(KratkoError::RecognitionError { code });
                }
                Some(EngineEvent::End) | None => {
                    events = None;
                    if !session.is_capturing() {
                        break;
                    }

                    barren_restarts = if run_had_events { 0 } else { barren_restarts + 1 };
                    run_had_events = false;
                    if barren_restarts > MAX_BARREN_RESTARTS {
                        warn!("Engine keeps ending immediately, waiting out the window");
                        continue;
                    }

                    match engine.start(&language) {
                        Ok(rx) => {
                            debug!("Engine ended early, restarted");
                            events = Some(rx);
                        }
                        Err(e) => warn!("Engine restart failed: {e}"),
                    }
                }
            },
        }
    }

    session.state = SessionState::Finished;
    Ok(transcript.trim().to_string())
}
