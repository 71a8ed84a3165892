//! `Tunedeck` Core Library
//!
//! This crate provides the core engine for the `Tunedeck` application:
//! - Bounded-concurrency download orchestration with per-job progress
//! - Stall detection and forced timeout for hung transfers
//! - Retry and cancellation of individual jobs
//! - Playlist completion aggregation across download jobs
//! - An ordered playback queue with shuffle, repeat, and transport state
//!
//! # Error Handling
//!
//! All fallible operations return the crate-wide [`error::Result`] built on
//! the typed [`error::Error`] enum. Terminal job failures additionally carry a
//! machine-readable [`error::ErrorCode`].
//!
//! ```rust,ignore
//! use tunedeck_core::{Error, Result};
//!
//! fn do_something() -> Result<()> {
//!     // Your code here
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod extractor;
pub mod job;
pub mod library;
pub mod naming;
pub mod orchestrator;
pub mod player;
pub mod tracker;

mod watchdog;

pub use config::OrchestratorConfig;
pub use error::{Error, ErrorCode, Result};
pub use events::{DownloadEvent, EventHub, FailedJobNote};
pub use extractor::{
    Extractor, ProgressFn, TrackMetadata, TransferOutcome, UNKNOWN_ALBUM, UNKNOWN_ARTIST,
};
pub use job::{DownloadJob, JobId, JobOptions, JobSnapshot, JobStatus, QueueStatus};
pub use library::{Library, Track};
pub use naming::{DefaultNamer, OutputNamer, sanitize_component};
pub use orchestrator::DownloadOrchestrator;
pub use player::{
    DEFAULT_HISTORY_LIMIT, DEFAULT_VOLUME, PlaybackQueue, PlayerState, RepeatMode,
};
pub use tracker::{CompletedAlbum, PlaylistTracker, TrackingEntry};
