//! Extraction adapter contract.
//!
//! The extraction tool (yt-dlp or equivalent) is an external collaborator:
//! given a URL it resolves track metadata and, on a transfer call, writes a
//! media file to a target path while reporting incremental progress. The
//! orchestrator only depends on this trait, which keeps the engine testable
//! with mocks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::job::JobOptions;

/// Fallback artist name when the source carries none.
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// Fallback album name when the source carries none.
pub const UNKNOWN_ALBUM: &str = "Unknown Album";

/// Track metadata resolved by the extraction adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMetadata {
    /// External id of the media item (video id or similar).
    pub external_id: String,
    /// Track title.
    pub title: String,
    /// Song artist, when the source knows it.
    pub artist: Option<String>,
    /// Uploader or channel name, used as an artist fallback.
    pub uploader: Option<String>,
    /// Album name, when the source knows it.
    pub album: Option<String>,
    /// Duration in seconds, when known.
    pub duration_secs: Option<u64>,
}

impl TrackMetadata {
    /// Artist with the `artist -> uploader -> "Unknown Artist"` fallback chain.
    #[must_use]
    pub fn resolved_artist(&self) -> &str {
        self.artist
            .as_deref()
            .or(self.uploader.as_deref())
            .unwrap_or(UNKNOWN_ARTIST)
    }

    /// Album name, falling back to `"Unknown Album"`.
    #[must_use]
    pub fn resolved_album(&self) -> &str {
        self.album.as_deref().unwrap_or(UNKNOWN_ALBUM)
    }
}

/// Progress callback invoked with a percentage in [0, 100].
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// Result of a successful transfer.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    /// Path of the written media file.
    pub output_path: PathBuf,
    /// Metadata as known after the transfer (may refine the resolved copy).
    pub metadata: TrackMetadata,
}

/// Extraction adapter trait for testability.
///
/// Cancellation is cooperative: implementations are expected to observe the
/// token promptly and abort the transfer. The orchestrator additionally races
/// the call against the token, so even a non-observing implementation cannot
/// hold a concurrency slot past cancellation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Resolve metadata for a URL without downloading anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be resolved.
    async fn resolve_metadata(&self, url: &str) -> Result<TrackMetadata>;

    /// Fetch and transcode the media item to `destination`.
    ///
    /// `on_progress` is invoked with a percentage in [0, 100] as the transfer
    /// advances.
    ///
    /// # Errors
    ///
    /// Returns an error if the transfer fails or is cancelled.
    async fn transfer(
        &self,
        url: &str,
        destination: &Path,
        options: &JobOptions,
        on_progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<TransferOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(artist: Option<&str>, uploader: Option<&str>, album: Option<&str>) -> TrackMetadata {
        TrackMetadata {
            external_id: "abc123".to_string(),
            title: "Test Track".to_string(),
            artist: artist.map(String::from),
            uploader: uploader.map(String::from),
            album: album.map(String::from),
            duration_secs: Some(180),
        }
    }

    #[test]
    fn test_artist_fallback_chain() {
        assert_eq!(
            metadata(Some("Artist"), Some("Channel"), None).resolved_artist(),
            "Artist"
        );
        assert_eq!(
            metadata(None, Some("Channel"), None).resolved_artist(),
            "Channel"
        );
        assert_eq!(metadata(None, None, None).resolved_artist(), UNKNOWN_ARTIST);
    }

    #[test]
    fn test_album_fallback() {
        assert_eq!(
            metadata(None, None, Some("Album")).resolved_album(),
            "Album"
        );
        assert_eq!(metadata(None, None, None).resolved_album(), UNKNOWN_ALBUM);
    }
}
