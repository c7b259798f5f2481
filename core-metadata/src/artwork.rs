//! Sidecar Artwork Discovery
//!
//! Audio files without embedded pictures often ship with a cover image in
//! the same directory (`cover.jpg`, `folder.png`, ...). This module finds
//! that image so the extractor can reference it.
//!
//! ## Overview
//!
//! - Checks well-known base names next to the audio file
//! - Falls back to an image named after the track itself
//! - Entirely best-effort: IO trouble, missing directories, and odd
//!   filenames all resolve to `None`, never to an error

use std::path::{Path, PathBuf};
use tracing::trace;

/// Base names commonly used for directory-level cover art, in preference
/// order.
const SIDECAR_BASENAMES: &[&str] = &["cover", "folder", "front", "album"];

/// Image extensions considered for sidecar artwork.
const SIDECAR_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Look for a cover image next to an audio file.
///
/// Tries the well-known base names first (`cover.jpg`, `folder.png`, ...),
/// then an image sharing the audio file's own stem (`song.mp3` next to
/// `song.jpg`). Matching is case-insensitive on both name and extension.
///
/// # Returns
///
/// The path of the first match, or `None` when the directory holds no
/// recognizable cover image or cannot be read at all.
pub async fn find_sibling_artwork(audio_path: &Path) -> Option<PathBuf> {
    let dir = audio_path.parent()?;
    let stem = audio_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase());

    let mut entries = tokio::fs::read_dir(dir).await.ok()?;

    // Candidates scored by preference: known base names in declared order,
    // then the track's own stem.
    let mut best: Option<(usize, PathBuf)> = None;

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let Some(ext) = path.extension().map(|e| e.to_string_lossy().to_lowercase()) else {
            continue;
        };
        if !SIDECAR_EXTENSIONS.contains(&ext.as_str()) {
            continue;
        }
        let Some(base) = path.file_stem().map(|s| s.to_string_lossy().to_lowercase()) else {
            continue;
        };

        let rank = SIDECAR_BASENAMES
            .iter()
            .position(|&known| known == base)
            .or_else(|| {
                stem.as_deref()
                    .filter(|s| *s == base)
                    .map(|_| SIDECAR_BASENAMES.len())
            });

        if let Some(rank) = rank {
            let better = match &best {
                Some((current, _)) => rank < *current,
                None => true,
            };
            if better {
                trace!(candidate = %path.display(), rank, "Sidecar artwork candidate");
                best = Some((rank, path));
            }
        }
    }

    best.map(|(_, path)| path)
}
