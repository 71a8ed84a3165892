//! Playback queue engine.
//!
//! A state machine over `{no-track, loaded} x {paused, playing}` holding the
//! ordered track queue, the current-position cursor, transport state, repeat
//! mode, and shuffle state. The engine has no concurrent writers by design:
//! one logical transport drives it, and every operation runs to completion
//! before the next is accepted. The only I/O it performs is the delegated
//! track/playlist lookup through the [`Library`] collaborator.
//!
//! Every mutating operation ends by broadcasting a full [`PlayerState`]
//! snapshot to subscribers.

use std::collections::VecDeque;
use std::sync::Arc;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::events::EventHub;
use crate::library::{Library, Track};

/// Default volume level.
pub const DEFAULT_VOLUME: u8 = 70;

/// Default number of track ids kept in the play history.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Repeat behavior applied by `next()` and `previous()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    /// Stop at the ends of the queue.
    #[default]
    None,
    /// Restart the current track on `next()`.
    Track,
    /// Wrap around at the ends of the queue.
    Queue,
}

impl std::fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Track => write!(f, "track"),
            Self::Queue => write!(f, "queue"),
        }
    }
}

/// Full state snapshot broadcast after every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    /// The currently loaded track, if any.
    pub current_track: Option<Track>,
    /// Index of the current track in the queue.
    pub current_index: Option<usize>,
    /// Whether the transport is playing.
    pub is_playing: bool,
    /// Playback position in seconds, clamped to the track duration.
    pub position_secs: f64,
    /// Volume in [0, 100].
    pub volume: u8,
    /// The ordered track queue.
    pub queue: Vec<Track>,
    /// Repeat mode.
    pub repeat: RepeatMode,
    /// Whether shuffle is active.
    pub shuffle: bool,
    /// Number of entries in the play history.
    pub history_len: usize,
}

/// Ordered track queue with transport state.
pub struct PlaybackQueue {
    library: Arc<dyn Library>,
    queue: Vec<Track>,
    current_index: Option<usize>,
    /// Pre-shuffle order; meaningful only while shuffle is active.
    original_order: Vec<Track>,
    repeat: RepeatMode,
    shuffle: bool,
    is_playing: bool,
    volume: u8,
    /// Accumulated playback seconds up to `playing_since`.
    position_base: f64,
    /// Set while playing; elapsed time since this instant adds to the base.
    playing_since: Option<Instant>,
    history: VecDeque<String>,
    history_limit: usize,
    events: EventHub<PlayerState>,
}

impl PlaybackQueue {
    /// Create an empty queue backed by the given library.
    #[must_use]
    pub fn new(library: Arc<dyn Library>) -> Self {
        Self::with_history_limit(library, DEFAULT_HISTORY_LIMIT)
    }

    /// Create an empty queue with a custom play-history bound.
    #[must_use]
    pub fn with_history_limit(library: Arc<dyn Library>, history_limit: usize) -> Self {
        Self {
            library,
            queue: Vec::new(),
            current_index: None,
            original_order: Vec::new(),
            repeat: RepeatMode::None,
            shuffle: false,
            is_playing: false,
            volume: DEFAULT_VOLUME,
            position_base: 0.0,
            playing_since: None,
            history: VecDeque::new(),
            history_limit,
            events: EventHub::default(),
        }
    }

    /// Subscribe to state snapshots.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PlayerState> {
        self.events.subscribe()
    }

    /// The currently loaded track.
    #[must_use]
    pub fn current_track(&self) -> Option<&Track> {
        self.current_index.and_then(|i| self.queue.get(i))
    }

    /// Playback position in seconds, clamped to the current track's duration.
    #[must_use]
    pub fn position_secs(&self) -> f64 {
        let mut position = self.position_base;
        if let Some(since) = self.playing_since {
            position += since.elapsed().as_secs_f64();
        }
        if let Some(duration) = self.current_track().and_then(|t| t.duration_secs) {
            position = position.min(duration as f64);
        }
        position
    }

    /// Full state snapshot.
    #[must_use]
    pub fn state(&self) -> PlayerState {
        PlayerState {
            current_track: self.current_track().cloned(),
            current_index: self.current_index,
            is_playing: self.is_playing,
            position_secs: self.position_secs(),
            volume: self.volume,
            queue: self.queue.clone(),
            repeat: self.repeat,
            shuffle: self.shuffle,
            history_len: self.history.len(),
        }
    }

    /// Load and play a track by id.
    ///
    /// If the track is already in the queue the cursor moves to its first
    /// occurrence; otherwise it is appended and selected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TrackNotFound`] if the library has no such track.
    pub async fn play(&mut self, track_id: &str) -> Result<()> {
        let track = self
            .library
            .track(track_id)
            .await?
            .ok_or_else(|| Error::TrackNotFound(track_id.to_string()))?;

        let index = match self.queue.iter().position(|t| t.id == track.id) {
            Some(index) => index,
            None => {
                if self.shuffle {
                    self.original_order.push(track.clone());
                }
                self.queue.push(track);
                self.queue.len() - 1
            }
        };
        self.current_index = Some(index);
        self.start_current();
        self.emit();
        Ok(())
    }

    /// Pause the transport without touching position or track.
    pub fn pause(&mut self) {
        if !self.is_playing || self.current_index.is_none() {
            return;
        }
        if let Some(since) = self.playing_since.take() {
            self.position_base += since.elapsed().as_secs_f64();
        }
        self.is_playing = false;
        debug!("Paused at {:.2}s", self.position_base);
        self.emit();
    }

    /// Resume a paused transport.
    pub fn resume(&mut self) {
        if self.is_playing || self.current_index.is_none() {
            return;
        }
        self.playing_since = Some(Instant::now());
        self.is_playing = true;
        self.emit();
    }

    /// Clear the current track and reset the transport.
    pub fn stop(&mut self) {
        if self.current_index.is_none() && !self.is_playing {
            return;
        }
        self.current_index = None;
        self.reset_transport();
        self.emit();
    }

    /// Seek to a position in seconds, clamped to `[0, duration]`.
    ///
    /// No-op when no track is loaded.
    pub fn seek(&mut self, position_secs: f64) {
        let Some(track) = self.current_track() else {
            return;
        };
        let mut target = position_secs.max(0.0);
        if let Some(duration) = track.duration_secs {
            target = target.min(duration as f64);
        }
        self.position_base = target;
        if self.is_playing {
            self.playing_since = Some(Instant::now());
        }
        self.emit();
    }

    /// Set the volume, clamped to [0, 100].
    pub fn set_volume(&mut self, volume: i32) {
        self.volume = volume.clamp(0, 100) as u8;
        self.emit();
    }

    /// Set the repeat mode; takes effect on the next `next()`/`previous()`.
    pub fn set_repeat(&mut self, mode: RepeatMode) {
        self.repeat = mode;
        self.emit();
    }

    /// Advance to the next track.
    ///
    /// With repeat=track the current track restarts at position 0 without
    /// advancing the cursor. Past the end of the queue, repeat=queue wraps to
    /// the start; otherwise the call is a no-op.
    pub fn next(&mut self) {
        if self.repeat == RepeatMode::Track && self.current_index.is_some() {
            self.start_current();
            self.emit();
            return;
        }
        if self.queue.is_empty() {
            return;
        }
        let target = match self.current_index {
            Some(index) => index + 1,
            None => 0,
        };
        let target = if target >= self.queue.len() {
            if self.repeat == RepeatMode::Queue {
                0
            } else {
                return;
            }
        } else {
            target
        };
        self.current_index = Some(target);
        self.start_current();
        self.emit();
    }

    /// Step back to the previous track.
    ///
    /// Before the start of the queue, repeat=queue wraps to the last index;
    /// otherwise the call is a no-op.
    pub fn previous(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        let target = match self.current_index {
            Some(index) if index > 0 => index - 1,
            _ => {
                if self.repeat == RepeatMode::Queue {
                    self.queue.len() - 1
                } else {
                    return;
                }
            }
        };
        self.current_index = Some(target);
        self.start_current();
        self.emit();
    }

    /// Insert a track into the queue.
    ///
    /// `position` defaults to appending; an insertion point at or before the
    /// current index shifts the cursor so it keeps pointing at the same track.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TrackNotFound`] if the library has no such track.
    pub async fn add_to_queue(&mut self, track_id: &str, position: Option<usize>) -> Result<()> {
        let track = self
            .library
            .track(track_id)
            .await?
            .ok_or_else(|| Error::TrackNotFound(track_id.to_string()))?;

        let insert_at = position.unwrap_or(self.queue.len()).min(self.queue.len());
        if self.shuffle {
            self.original_order.push(track.clone());
        }
        self.queue.insert(insert_at, track);
        if let Some(current) = self.current_index {
            if insert_at <= current {
                self.current_index = Some(current + 1);
            }
        }
        self.emit();
        Ok(())
    }

    /// Remove the entry at `position` from the queue.
    ///
    /// Removing the currently playing entry stops playback; removing an entry
    /// before the current index shifts the cursor back by one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPosition`] if `position` is out of range.
    pub fn remove_from_queue(&mut self, position: usize) -> Result<()> {
        if position >= self.queue.len() {
            return Err(Error::InvalidPosition {
                position,
                len: self.queue.len(),
            });
        }

        match self.current_index {
            Some(current) if position == current => {
                self.current_index = None;
                self.reset_transport();
            }
            Some(current) if position < current => {
                self.current_index = Some(current - 1);
            }
            _ => {}
        }

        let removed = self.queue.remove(position);
        if self.shuffle {
            if let Some(index) = self.original_order.iter().position(|t| t.id == removed.id) {
                self.original_order.remove(index);
            }
        }
        self.emit();
        Ok(())
    }

    /// Empty the queue and stop playback.
    pub fn clear_queue(&mut self) {
        self.queue.clear();
        self.original_order.clear();
        self.current_index = None;
        self.reset_transport();
        self.emit();
    }

    /// Replace the queue with the ordered tracks of a playlist.
    ///
    /// Resets the cursor and snapshots the loaded order as the original
    /// order.
    ///
    /// # Errors
    ///
    /// Propagates the library's playlist-not-found error.
    pub async fn load_playlist(&mut self, playlist_id: &str) -> Result<()> {
        let tracks = self.library.playlist_tracks(playlist_id).await?;
        info!("Loaded playlist {playlist_id} with {} tracks", tracks.len());
        self.original_order = tracks.clone();
        self.queue = tracks;
        self.current_index = None;
        self.reset_transport();
        self.emit();
        Ok(())
    }

    /// Toggle shuffle.
    ///
    /// Turning shuffle on snapshots the queue as the original order and
    /// uniformly permutes only the tracks strictly after the current index.
    /// Turning it off restores the snapshot and relocates the current track
    /// by id; if it is gone, the cursor clears and playback stops.
    pub fn toggle_shuffle(&mut self) {
        if self.shuffle {
            let current_id = self.current_track().map(|t| t.id.clone());
            self.queue = std::mem::take(&mut self.original_order);
            self.current_index =
                current_id.and_then(|id| self.queue.iter().position(|t| t.id == id));
            if self.current_index.is_none() {
                self.reset_transport();
            }
            self.shuffle = false;
        } else {
            self.original_order = self.queue.clone();
            let start = self.current_index.map_or(0, |i| i + 1);
            self.queue[start..].shuffle(&mut rand::rng());
            self.shuffle = true;
        }
        self.emit();
    }

    /// Mark the current track as freshly started.
    fn start_current(&mut self) {
        self.position_base = 0.0;
        self.playing_since = Some(Instant::now());
        self.is_playing = true;
        if let Some(id) = self.current_track().map(|t| t.id.clone()) {
            self.push_history(id);
        }
    }

    fn reset_transport(&mut self) {
        self.is_playing = false;
        self.position_base = 0.0;
        self.playing_since = None;
    }

    /// Append to the play history, deduplicating consecutive repeats.
    fn push_history(&mut self, track_id: String) {
        if self.history.back() == Some(&track_id) {
            return;
        }
        self.history.push_back(track_id);
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }

    fn emit(&self) {
        self.events.broadcast_lossy(self.state());
    }
}

impl std::fmt::Debug for PlaybackQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackQueue")
            .field("queue_len", &self.queue.len())
            .field("current_index", &self.current_index)
            .field("is_playing", &self.is_playing)
            .field("repeat", &self.repeat)
            .field("shuffle", &self.shuffle)
            .finish_non_exhaustive()
    }
}
