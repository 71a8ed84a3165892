//! Playlist completion tracking.
//!
//! Aggregates the jobs belonging to one album or playlist and reports the
//! moment every expected track has been persisted. Entries are one-shot: the
//! entry is deleted the instant the completed count reaches the expected
//! total.
//!
//! Only successful completions count. A job that permanently fails never
//! increments the counter, so an album with a permanent failure never reports
//! completion. That mirrors the original system's behavior and is preserved
//! deliberately; see DESIGN.md.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Aggregation record for one album or playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEntry {
    /// Canonical album name for display.
    pub display_name: String,
    /// Expected total track count.
    pub expected: usize,
    /// Tracks persisted so far.
    pub completed: usize,
    /// Ids of the persisted tracks, in completion order.
    pub track_ids: Vec<String>,
}

/// Emitted when the last expected track of an album completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedAlbum {
    /// Canonical album name.
    pub name: String,
    /// Expected total track count.
    pub total: usize,
    /// Ids of all persisted tracks.
    pub track_ids: Vec<String>,
}

/// In-memory playlist tracking table, keyed by album name.
///
/// The album name is the key because no external playlist id is guaranteed to
/// exist for every source.
#[derive(Debug, Default)]
pub struct PlaylistTracker {
    entries: HashMap<String, TrackingEntry>,
}

impl PlaylistTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin tracking an album expecting `expected` tracks.
    ///
    /// Re-registering an existing key resets its entry.
    pub fn start_tracking(
        &mut self,
        key: impl Into<String>,
        display_name: impl Into<String>,
        expected: usize,
    ) {
        let key = key.into();
        let display_name = display_name.into();
        if expected == 0 {
            warn!("Ignoring tracking request for '{key}' with zero expected tracks");
            return;
        }
        info!("Tracking album '{key}' expecting {expected} tracks");
        self.entries.insert(
            key,
            TrackingEntry {
                display_name,
                expected,
                completed: 0,
                track_ids: Vec::with_capacity(expected),
            },
        );
    }

    /// Record one successfully persisted track for `key`.
    ///
    /// Returns the completed album the moment the expected count is reached,
    /// deleting the entry. A key that was never registered is a silent no-op:
    /// single-track downloads are not part of any playlist.
    pub fn record_completion(
        &mut self,
        key: &str,
        track_id: impl Into<String>,
    ) -> Option<CompletedAlbum> {
        let entry = match self.entries.get_mut(key) {
            Some(entry) => entry,
            None => {
                debug!("No tracking entry for '{key}', ignoring completion");
                return None;
            }
        };

        entry.completed += 1;
        entry.track_ids.push(track_id.into());
        debug!(
            "Album '{key}': {}/{} tracks complete",
            entry.completed, entry.expected
        );

        if entry.completed < entry.expected {
            return None;
        }

        // One-shot: remove the entry as it completes.
        let entry = self.entries.remove(key)?;
        info!("Album '{}' completed with {} tracks", entry.display_name, entry.expected);
        Some(CompletedAlbum {
            name: entry.display_name,
            total: entry.expected,
            track_ids: entry.track_ids,
        })
    }

    /// Whether `key` currently has a tracking entry.
    #[must_use]
    pub fn is_tracked(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Current entry for `key`, if any.
    #[must_use]
    pub fn entry(&self, key: &str) -> Option<&TrackingEntry> {
        self.entries.get(key)
    }

    /// Number of albums currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no album is currently tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
