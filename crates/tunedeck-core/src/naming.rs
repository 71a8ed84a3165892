//! Output path construction for downloaded media files.
//!
//! Files land under `base_dir/artist/album/title.<ext>`. Path components are
//! sanitized so titles coming from arbitrary remote metadata cannot escape the
//! base directory or produce invalid filenames.

use std::path::{Path, PathBuf};

/// Builds the output location for a downloaded track.
#[cfg_attr(test, mockall::automock)]
pub trait OutputNamer: Send + Sync {
    /// Build the output path (without extension) for a track.
    fn build_output_path(&self, base_dir: &Path, artist: &str, album: &str, title: &str)
        -> PathBuf;
}

/// Default namer producing a sanitized `artist/album/title` layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultNamer;

impl OutputNamer for DefaultNamer {
    fn build_output_path(
        &self,
        base_dir: &Path,
        artist: &str,
        album: &str,
        title: &str,
    ) -> PathBuf {
        base_dir
            .join(sanitize_component(artist))
            .join(sanitize_component(album))
            .join(sanitize_component(title))
    }
}

/// Sanitize a string for use as a single path component.
#[must_use]
pub fn sanitize_component(name: &str) -> String {
    let invalid_chars = ['/', '\\', ':', '*', '?', '"', '<', '>', '|', '\0'];

    let sanitized: String = name
        .chars()
        .map(|c| {
            if invalid_chars.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    // Trim whitespace and dots from ends
    let trimmed = sanitized.trim().trim_matches('.');

    if trimmed.is_empty() {
        return "_".to_string();
    }

    // Limit length (leaving room for extension)
    if trimmed.len() > 200 {
        trimmed.chars().take(200).collect()
    } else {
        trimmed.to_string()
    }
}
