//! Persistence collaborator contract.
//!
//! Track, artist and album storage lives outside this crate. The engine only
//! needs to persist completed downloads, look tracks and playlists up for the
//! player, and leave a note when a download could not be completed so it can
//! be retried later.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::extractor::TrackMetadata;

/// A persisted track record, as the library stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    /// Stable track id.
    pub id: String,
    /// Track title.
    pub title: String,
    /// Artist name.
    pub artist: String,
    /// Album name.
    pub album: String,
    /// Duration in seconds, when known.
    pub duration_secs: Option<u64>,
    /// Path of the media file on disk.
    pub file_path: PathBuf,
}

/// Library persistence trait for testability.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Library: Send + Sync {
    /// Create or update the track for `metadata`, returning its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    async fn create_or_update_track(
        &self,
        metadata: &TrackMetadata,
        file_path: &Path,
    ) -> Result<String>;

    /// Look up a track by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup itself fails; an unknown id is `None`.
    async fn track(&self, track_id: &str) -> Result<Option<Track>>;

    /// Ordered tracks of a playlist or album.
    ///
    /// # Errors
    ///
    /// Returns an error if the playlist is unknown.
    async fn playlist_tracks(&self, playlist_id: &str) -> Result<Vec<Track>>;

    /// Record that a download failed so the track can be retried later.
    ///
    /// Best effort: callers ignore failures of this call.
    async fn record_missing_track<'a>(&self, reason: &str, url: &str, title: Option<&'a str>);
}
