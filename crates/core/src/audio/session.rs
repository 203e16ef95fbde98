use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::{
    audio::{AudioBlob, CaptureSlot, ChunkFormat, MediaHost, RecorderEvent},
    error::{KratkoError, Result},
};

pub const DEFAULT_TIMESLICE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopReason {
    Requested,
    Timeout,
    StreamEnded,
}

/// Closes the stop channel once the window has elapsed, so a stop racing the
/// deadline either lands before the close and counts as requested, or fails
/// on the sender's side.
pub(crate) fn close_on_deadline(stop_rx: &mut oneshot::Receiver<()>) -> StopReason {
    stop_rx.close();
    match stop_rx.try_recv() {
        Ok(()) => StopReason::Requested,
        Err(_) => StopReason::Timeout,
    }
}

/// Records a bounded window of the page's media audio.
pub struct AudioSession {
    host: Arc<dyn MediaHost>,
    slot: CaptureSlot,
    timeslice: Duration,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl AudioSession {
    pub fn new(host: Arc<dyn MediaHost>, slot: CaptureSlot) -> Self {
        Self {
            host,
            slot,
            timeslice: DEFAULT_TIMESLICE,
            stop_tx: Mutex::new(None),
        }
    }

    pub fn with_timeslice(mut self, timeslice: Duration) -> Self {
        self.timeslice = timeslice;
        self
    }

    /// Records for at most `duration`, or until [`AudioSession::stop`].
    pub async fn capture(&self, duration: Duration) -> Result<AudioBlob> {
        let _guard = self
            .slot
            .try_acquire()
            .ok_or(KratkoError::CaptureInProgress)?;

        let element = self
            .host
            .video_element()
            .ok_or(KratkoError::NoVideoElement)?;
        let stream = element
            .capture_stream()
            .ok_or(KratkoError::AudioCaptureUnsupported)?;
        if stream.audio_track_count() == 0 {
            return Err(KratkoError::NoAudioTrack);
        }

        let format = stream.format();
        let events = stream
            .record_audio(self.timeslice)
            .map_err(|reason| KratkoError::RecordingError { reason })?;

        let (stop_tx, stop_rx) = oneshot::channel();
        *self.stop_tx.lock().expect("AudioSession poisoned") = Some(stop_tx);

        let result = self.record(events, stop_rx, duration, &format).await;
        self.stop_tx.lock().expect("AudioSession poisoned").take();
        result
    }

    /// Ends the active capture early. Returns `false` when nothing was
    /// recording, so repeated or late calls are no-ops.
    pub fn stop(&self) -> bool {
        let stop_tx = self.stop_tx.lock().expect("AudioSession poisoned").take();
        match stop_tx {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.stop_tx.lock().expect("AudioSession poisoned").is_some()
    }

    async fn record(
        &self,
        mut events: mpsc::Receiver<RecorderEvent>,
        mut stop_rx: oneshot::Receiver<()>,
        duration: Duration,
        format: &ChunkFormat,
    ) -> Result<AudioBlob> {
        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);

        let mut chunks: Vec<Vec<u8>> = Vec::new();
        let reason = loop {
            tokio::select! {
                biased;
                _ = &mut stop_rx => break StopReason::Requested,
                _ = &mut deadline => break close_on_deadline(&mut stop_rx),
                event = events.recv() => match event {
                    Some(RecorderEvent::Data(data)) => {
                        if !data.is_empty() {
                            chunks.push(data);
                        }
                    }
                    Some(RecorderEvent::Error(reason)) => {
                        return Err(KratkoError::RecordingError { reason });
                    }
                    None => break StopReason::StreamEnded,
                },
            }
        };

        // flush whatever the recorder already handed over
        while let Ok(event) = events.try_recv() {
            if let RecorderEvent::Data(data) = event {
                if !data.is_empty() {
                    chunks.push(data);
                }
            }
        }
        drop(events);

        debug!(?reason, chunks = chunks.len(), "Audio capture stopped");
        let blob = AudioBlob::assemble(format, chunks)?;
        info!(bytes = blob.data.len(), mime = blob.mime_type.as_str(), "Audio captured");
        Ok(blob)
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::audio::{MediaElement, MediaStream};

    /// Media element emitting one fixed chunk per timeslice.
    pub struct FakeElement {
        pub paused: AtomicBool,
        pub capturable: bool,
        pub audio_tracks: usize,
        pub chunk: Vec<u8>,
        pub fail_after: Option<usize>,
    }

    impl FakeElement {
        pub fn playing() -> Self {
            Self {
                paused: AtomicBool::new(false),
                capturable: true,
                audio_tracks: 1,
                chunk: vec![7; 4],
                fail_after: None,
            }
        }
    }

    struct FakeStream {
        audio_tracks: usize,
        chunk: Vec<u8>,
        fail_after: Option<usize>,
    }

    impl MediaElement for FakeElement {
        fn is_paused(&self) -> bool {
            self.paused.load(Ordering::SeqCst)
        }

        fn capture_stream(&self) -> Option<Box<dyn MediaStream>> {
            self.capturable.then(|| {
                Box::new(FakeStream {
                    audio_tracks: self.audio_tracks,
                    chunk: self.chunk.clone(),
                    fail_after: self.fail_after,
                }) as Box<dyn MediaStream>
            })
        }
    }

    impl MediaStream for FakeStream {
        fn audio_track_count(&self) -> usize {
            self.audio_tracks
        }

        fn format(&self) -> ChunkFormat {
            ChunkFormat::Encoded {
                mime_type: "audio/webm;codecs=opus".into(),
            }
        }

        fn record_audio(
            self: Box<Self>,
            timeslice: Duration,
        ) -> std::result::Result<mpsc::Receiver<RecorderEvent>, String> {
            let (tx, rx) = mpsc::channel(16);
            tokio::spawn(async move {
                let mut sent = 0;
                loop {
                    tokio::time::sleep(timeslice).await;
                    if Some(sent) == self.fail_after {
                        let _ = tx.send(RecorderEvent::Error("device lost".into())).await;
                        return;
                    }
                    if tx.send(RecorderEvent::Data(self.chunk.clone())).await.is_err() {
                        return;
                    }
                    sent += 1;
                }
            });
            Ok(rx)
        }
    }

    pub struct FakeHost(pub Option<Arc<FakeElement>>);

    impl MediaHost for FakeHost {
        fn video_element(&self) -> Option<Arc<dyn MediaElement>> {
            self.0
                .as_ref()
                .map(|e| Arc::clone(e) as Arc<dyn MediaElement>)
        }
    }
}
