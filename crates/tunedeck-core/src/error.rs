//! Error types for Tunedeck core operations.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Tunedeck core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Download job not found.
    #[error("Job not found: {0}")]
    JobNotFound(u64),

    /// Track not found in the library.
    #[error("Track not found: {0}")]
    TrackNotFound(String),

    /// Playlist not found in the library.
    #[error("Playlist not found: {0}")]
    PlaylistNotFound(String),

    /// Queue position is out of range.
    #[error("Invalid queue position: {position} (queue length {len})")]
    InvalidPosition {
        /// The requested position.
        position: usize,
        /// Current queue length.
        len: usize,
    },

    /// Metadata resolution failed for a URL.
    #[error("Metadata resolution failed for {url}: {message}")]
    MetadataResolution {
        /// The source URL.
        url: String,
        /// Error message from the extraction adapter.
        message: String,
    },

    /// Media transfer failed.
    #[error("Transfer failed: {0}")]
    Transfer(String),

    /// Persisting a downloaded track failed.
    #[error("Persistence failed: {0}")]
    Persistence(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Machine-readable failure code recorded on failed jobs.
///
/// The code is stored alongside the human-readable message and carried in
/// `failed` lifecycle events so transport layers can branch without parsing
/// message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The job was cancelled by the caller.
    Cancelled,
    /// The stall watchdog force-failed the job.
    StallTimeout,
    /// Metadata resolution failed before any transfer started.
    MetadataFailed,
    /// The extraction adapter reported a transfer error.
    TransferFailed,
    /// The track could not be persisted after a successful transfer.
    PersistenceFailed,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::StallTimeout => write!(f, "STALL_TIMEOUT"),
            Self::MetadataFailed => write!(f, "METADATA_FAILED"),
            Self::TransferFailed => write!(f, "TRANSFER_FAILED"),
            Self::PersistenceFailed => write!(f, "PERSISTENCE_FAILED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_not_found_display() {
        let err = Error::JobNotFound(42);
        assert_eq!(err.to_string(), "Job not found: 42");
    }

    #[test]
    fn test_invalid_position_display() {
        let err = Error::InvalidPosition { position: 7, len: 3 };
        assert!(err.to_string().contains('7'));
        assert!(err.to_string().contains('3'));
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::Cancelled.to_string(), "CANCELLED");
        assert_eq!(ErrorCode::StallTimeout.to_string(), "STALL_TIMEOUT");
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::StallTimeout).unwrap();
        assert_eq!(json, "\"STALL_TIMEOUT\"");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
