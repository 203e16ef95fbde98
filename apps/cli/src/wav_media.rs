use std::{path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use kratko_core::audio::{ChunkFormat, MediaElement, MediaHost, MediaStream, RecorderEvent};
use tokio::sync::mpsc;
use tracing::debug;

/// A WAV file standing in for the page's video element. Every capture plays
/// it from the start in real time.
#[derive(Clone)]
pub struct WavMedia {
    track: Arc<WavTrack>,
}

struct WavTrack {
    sample_rate: u32,
    channels: u16,
    /// Interleaved little-endian 16-bit samples.
    pcm: Vec<u8>,
}

impl WavMedia {
    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = hound::WavReader::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let spec = reader.spec();
        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            bail!(
                "{} must be 16-bit PCM, got {} bit {:?}",
                path.display(),
                spec.bits_per_sample,
                spec.sample_format
            );
        }

        let mut pcm = Vec::with_capacity(reader.len() as usize * 2);
        for sample in reader.samples::<i16>() {
            pcm.extend_from_slice(&sample?.to_le_bytes());
        }
        debug!(
            path = %path.display(),
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            bytes = pcm.len(),
            "WAV media loaded"
        );

        Ok(Self {
            track: Arc::new(WavTrack {
                sample_rate: spec.sample_rate,
                channels: spec.channels,
                pcm,
            }),
        })
    }

    pub fn duration(&self) -> Duration {
        let t = &self.track;
        let frames = t.pcm.len() as f64 / (2.0 * t.channels.max(1) as f64);
        Duration::from_secs_f64(frames / t.sample_rate.max(1) as f64)
    }
}

impl MediaHost for WavMedia {
    fn video_element(&self) -> Option<Arc<dyn MediaElement>> {
        Some(Arc::new(self.clone()))
    }
}

impl MediaElement for WavMedia {
    fn is_paused(&self) -> bool {
        false
    }

    fn capture_stream(&self) -> Option<Box<dyn MediaStream>> {
        Some(Box::new(WavStream {
            track: Arc::clone(&self.track),
        }))
    }
}

struct WavStream {
    track: Arc<WavTrack>,
}

impl MediaStream for WavStream {
    fn audio_track_count(&self) -> usize {
        1
    }

    fn format(&self) -> ChunkFormat {
        ChunkFormat::Pcm16 {
            sample_rate: self.track.sample_rate,
            channels: self.track.channels,
        }
    }

    fn record_audio(
        self: Box<Self>,
        timeslice: Duration,
    ) -> std::result::Result<mpsc::Receiver<RecorderEvent>, String> {
        let track = self.track;
        let frame_bytes = 2 * track.channels.max(1) as usize;
        let frames_per_slice =
            ((track.sample_rate as f64 * timeslice.as_secs_f64()).round() as usize).max(1);
        let chunk_bytes = frames_per_slice * frame_bytes;

        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(timeslice);
            ticker.tick().await;
            for chunk in track.pcm.chunks(chunk_bytes) {
                ticker.tick().await;
                if tx.send(RecorderEvent::Data(chunk.to_vec())).await.is_err() {
                    return;
                }
            }
            // dropping the sender ends the stream once playback is over
        });
        Ok(rx)
    }
}
