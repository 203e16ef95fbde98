use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::sync::mpsc;

/// How the chunks a recorder emits are laid out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkFormat {
    /// Container-encoded chunks that concatenate into one file.
    Encoded { mime_type: String },
    /// Little-endian 16-bit PCM frames.
    Pcm16 { sample_rate: u32, channels: u16 },
}

#[derive(Debug)]
pub enum RecorderEvent {
    Data(Vec<u8>),
    Error(String),
}

/// The page's media element.
pub trait MediaElement: Send + Sync {
    fn is_paused(&self) -> bool;

    /// The element's live stream, or `None` when the host cannot capture it.
    fn capture_stream(&self) -> Option<Box<dyn MediaStream>>;
}

pub trait MediaStream: Send {
    fn audio_track_count(&self) -> usize;

    fn format(&self) -> ChunkFormat;

    /// Records the audio tracks only, emitting one chunk per `timeslice`.
    /// Recording stops once the receiver is dropped.
    fn record_audio(
        self: Box<Self>,
        timeslice: Duration,
    ) -> Result<mpsc::Receiver<RecorderEvent>, String>;
}

/// Gives access to the media element currently on the page, if any.
pub trait MediaHost: Send + Sync {
    fn video_element(&self) -> Option<Arc<dyn MediaElement>>;
}

/// Page without any media element.
pub struct NoMedia;

impl MediaHost for NoMedia {
    fn video_element(&self) -> Option<Arc<dyn MediaElement>> {
        None
    }
}

/// Single-occupancy slot shared by every capture and recognition session of
/// one page. A second start is rejected, never queued.
#[derive(Clone, Default)]
pub struct CaptureSlot {
    busy: Arc<AtomicBool>,
}

pub struct CaptureGuard {
    busy: Arc<AtomicBool>,
}

impl CaptureSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<CaptureGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CaptureGuard {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
