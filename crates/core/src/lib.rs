pub mod audio;
pub mod bus;
pub mod config;
pub mod contexts;
pub mod error;
pub mod format;
pub mod page;
pub mod provider;
pub mod recognition;
pub mod summary;
pub mod tracks;
pub mod transcript;
pub mod types;

#[cfg(test)]
mod test_support;

pub use bus::{ContextId, Dispatch, Endpoint, MessageBus};
pub use config::{JsonFileStore, MemoryStore, Settings, SettingsPatch, SettingsStore};
pub use contexts::{Acquisition, AcquisitionOrchestrator, AcquisitionState, Coordinator, Outcome, PageAgent, Progress};
pub use error::{KratkoError, Result};
pub use format::{format_outcome_readable, format_timestamp, format_transcript_with_timestamps};
pub use page::{PageSource, PageState};
pub use provider::{Provider, ProviderConfig, ProviderKind};
pub use types::{RecognitionBackend, SubtitleSegment, SubtitleTrack, Transcript, VideoContext};
