//! Audio Tag Extraction
//!
//! This module parses metadata out of local audio files using the `lofty`
//! crate. It supports ID3v2, Vorbis Comments, MP4 tags, and FLAC.
//!
//! ## Overview
//!
//! - Extracts tag metadata (title, artist, album, genre, numbering)
//! - Normalizes text: trimmed, whitespace-collapsed, empty becomes absent
//! - Never fabricates numbers: a missing track number stays `None`, it is
//!   not reported as 0
//! - Optionally fingerprints the content bytes with SHA-256
//! - Resolves artwork best-effort: embedded pictures first, then sibling
//!   cover files; artwork trouble never fails the track
//!
//! ## Failure taxonomy
//!
//! | Failure                         | Error                                    |
//! |---------------------------------|------------------------------------------|
//! | File unreadable (missing, perms)| [`ExtractionError::UnreadableSource`]    |
//! | Format not recognized           | [`ExtractionError::UnsupportedFormat`]   |
//! | Recognized but unparseable      | [`ExtractionError::CorruptMetadata`]     |
//!
//! ## Usage
//!
//! ```ignore
//! use core_metadata::extractor::MetadataExtractor;
//! use bridge_traits::Locator;
//! use std::path::PathBuf;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let extractor = MetadataExtractor::new();
//! let locator = Locator::Path(PathBuf::from("song.mp3"));
//! let track = extractor.extract(&locator).await?;
//!
//! println!("Title: {}", track.title.unwrap_or_default());
//! # Ok(())
//! # }
//! ```

use bridge_traits::{ExtractedTrack, ExtractionError, Locator};
use lofty::config::ParseOptions;
use lofty::error::ErrorKind;
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::Accessor;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::UNIX_EPOCH;
use tracing::debug;

use crate::artwork::find_sibling_artwork;

/// Marker stored in `artwork_ref` when the artwork lives inside the audio
/// file's own tag rather than in a sibling image file.
pub const EMBEDDED_ARTWORK_REF: &str = "embedded";

/// Audio metadata extractor
///
/// Parses tag metadata out of local audio files using the `lofty` crate.
/// Supports ID3v2, Vorbis Comments, MP4 tags, FLAC, and other common
/// formats.
pub struct MetadataExtractor {
    /// Parse options for lofty
    parse_options: ParseOptions,
    /// Whether to hash the content bytes
    compute_fingerprint: bool,
}

impl MetadataExtractor {
    /// Create a new metadata extractor with default settings
    pub fn new() -> Self {
        Self {
            parse_options: ParseOptions::new(),
            compute_fingerprint: true,
        }
    }

    /// Create extractor with custom parse options
    pub fn with_options(parse_options: ParseOptions) -> Self {
        Self {
            parse_options,
            compute_fingerprint: true,
        }
    }

    /// Enable or disable content fingerprinting
    pub fn fingerprinting(mut self, enabled: bool) -> Self {
        self.compute_fingerprint = enabled;
        self
    }

    /// Extract metadata for a local file locator.
    ///
    /// # Returns
    ///
    /// Returns `Ok(ExtractedTrack)` carrying whatever the tags provide.
    /// Text fields are normalized; fields the file does not carry are
    /// `None`. A file with no tags at all still succeeds, with only the
    /// audio properties and freshness filled in.
    ///
    /// # Errors
    ///
    /// - [`ExtractionError::UnreadableSource`] when the file cannot be
    ///   opened or read
    /// - [`ExtractionError::UnsupportedFormat`] when lofty cannot
    ///   recognize the content
    /// - [`ExtractionError::CorruptMetadata`] when the format is
    ///   recognized but its tag data cannot be parsed
    pub async fn extract(&self, locator: &Locator) -> Result<ExtractedTrack, ExtractionError> {
        let key = locator.as_key();
        let path = locator
            .as_path()
            .ok_or_else(|| ExtractionError::UnreadableSource {
                locator: key.clone(),
                message: "not a filesystem locator".to_string(),
            })?;

        debug!(file = %path.display(), "Extracting metadata");

        let modified_at = read_modified_ms(path, &key).await?;

        let file_data =
            tokio::fs::read(path)
                .await
                .map_err(|e| ExtractionError::UnreadableSource {
                    locator: key.clone(),
                    message: e.to_string(),
                })?;

        let tagged_file = Probe::new(std::io::Cursor::new(&file_data))
            .options(self.parse_options)
            .guess_file_type()
            .map_err(|e| ExtractionError::UnreadableSource {
                locator: key.clone(),
                message: e.to_string(),
            })?
            .read()
            .map_err(|e| match e.kind() {
                ErrorKind::UnknownFormat => ExtractionError::UnsupportedFormat {
                    locator: key.clone(),
                },
                _ => ExtractionError::CorruptMetadata {
                    locator: key.clone(),
                    message: e.to_string(),
                },
            })?;

        let properties = tagged_file.properties();
        let duration_ms = i64::try_from(properties.duration().as_millis())
            .ok()
            .filter(|&d| d > 0);

        let mut track = ExtractedTrack::new(locator.clone(), modified_at);
        track.duration_ms = duration_ms;

        if self.compute_fingerprint {
            track.content_fingerprint = Some(calculate_fingerprint(&file_data));
        }

        // Primary tag, falling back to the first available tag
        let tag = tagged_file.primary_tag().or_else(|| tagged_file.first_tag());

        let mut has_embedded_artwork = false;
        if let Some(tag) = tag {
            track.title = tag.title().as_deref().and_then(normalize_text);
            track.artist_name = tag.artist().as_deref().and_then(normalize_text);
            track.album_title = tag.album().as_deref().and_then(normalize_text);
            track.genre_name = tag.genre().as_deref().and_then(normalize_text);
            track.track_number = tag.track().map(i64::from).filter(|&n| n > 0);
            track.disc_number = tag.disk().map(i64::from).filter(|&n| n > 0);
            has_embedded_artwork = tag.pictures().iter().any(|p| !p.data().is_empty());
        } else {
            debug!(file = %path.display(), "No tags found, keeping audio properties only");
        }

        // Best effort only; a failed artwork scan never fails the track
        track.artwork_ref = if has_embedded_artwork {
            Some(EMBEDDED_ARTWORK_REF.to_string())
        } else {
            find_sibling_artwork(path)
                .await
                .map(|p| p.display().to_string())
        };

        Ok(track)
    }
}

impl Default for MetadataExtractor {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_modified_ms(path: &Path, key: &str) -> Result<i64, ExtractionError> {
    let metadata =
        tokio::fs::metadata(path)
            .await
            .map_err(|e| ExtractionError::UnreadableSource {
                locator: key.to_string(),
                message: e.to_string(),
            })?;

    let modified = metadata
        .modified()
        .map_err(|e| ExtractionError::UnreadableSource {
            locator: key.to_string(),
            message: format!("no modification time: {}", e),
        })?;

    let ms = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);

    Ok(ms)
}

/// SHA-256 of the content bytes, hex-encoded.
pub fn calculate_fingerprint(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    format!("{:x}", result)
}

/// Normalize tag text.
///
/// - Trims leading/trailing whitespace
/// - Collapses consecutive whitespace to a single space
/// - Removes null bytes and control characters
/// - Returns `None` when nothing printable remains
pub fn normalize_text(text: &str) -> Option<String> {
    let cleaned: String = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .filter(|c| !c.is_control())
        .collect();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn locator(path: &Path) -> Locator {
        Locator::Path(path.to_path_buf())
    }

    /// Minimal valid PCM WAV: 16-bit mono 44.1kHz with half a second of
    /// silence. Enough for lofty to recognize the format and compute a
    /// duration.
    fn write_wav(path: &Path) {
        let sample_rate: u32 = 44_100;
        let byte_rate: u32 = sample_rate * 2;
        let data_len: u32 = byte_rate / 2;

        let mut file = std::fs::File::create(path).unwrap();
        file.write_all(b"RIFF").unwrap();
        file.write_all(&(36 + data_len).to_le_bytes()).unwrap();
        file.write_all(b"WAVE").unwrap();
        file.write_all(b"fmt ").unwrap();
        file.write_all(&16u32.to_le_bytes()).unwrap();
        file.write_all(&1u16.to_le_bytes()).unwrap(); // PCM
        file.write_all(&1u16.to_le_bytes()).unwrap(); // mono
        file.write_all(&sample_rate.to_le_bytes()).unwrap();
        file.write_all(&byte_rate.to_le_bytes()).unwrap();
        file.write_all(&2u16.to_le_bytes()).unwrap(); // block align
        file.write_all(&16u16.to_le_bytes()).unwrap(); // bits per sample
        file.write_all(b"data").unwrap();
        file.write_all(&data_len.to_le_bytes()).unwrap();
        file.write_all(&vec![0u8; data_len as usize]).unwrap();
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(
            normalize_text("  Hello   World  "),
            Some("Hello World".to_string())
        );
        assert_eq!(
            normalize_text("Title\nWith\tWhitespace"),
            Some("Title With Whitespace".to_string())
        );
        assert_eq!(normalize_text("Clean Text"), Some("Clean Text".to_string()));
        // Empty after trimming is absent, not empty
        assert_eq!(normalize_text("   "), None);
        assert_eq!(normalize_text(""), None);
        assert_eq!(normalize_text("\u{0000}\u{0007}"), None);
    }

    #[test]
    fn test_calculate_fingerprint() {
        let hash = calculate_fingerprint(b"test data");

        // SHA-256 hash should be 64 hex characters
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));

        // Same data should produce same hash
        assert_eq!(hash, calculate_fingerprint(b"test data"));

        // Different data should produce different hash
        assert_ne!(hash, calculate_fingerprint(b"different data"));
    }

    #[tokio::test]
    async fn test_missing_file_is_unreadable_source() {
        let extractor = MetadataExtractor::new();
        let missing = locator(&PathBuf::from("/definitely/not/here.mp3"));

        let err = extractor.extract(&missing).await.unwrap_err();
        assert!(matches!(err, ExtractionError::UnreadableSource { .. }));
    }

    #[tokio::test]
    async fn test_unrecognized_content_is_unsupported_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.mp3");
        std::fs::write(&path, b"this is not audio at all").unwrap();

        let extractor = MetadataExtractor::new();
        let err = extractor.extract(&locator(&path)).await.unwrap_err();
        assert!(matches!(err, ExtractionError::UnsupportedFormat { .. }));
    }

    #[tokio::test]
    async fn test_untagged_wav_extracts_properties_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silence.wav");
        write_wav(&path);

        let extractor = MetadataExtractor::new();
        let track = extractor.extract(&locator(&path)).await.unwrap();

        // No tags: text fields are absent, not defaulted
        assert_eq!(track.title, None);
        assert_eq!(track.artist_name, None);
        assert_eq!(track.track_number, None);

        // Audio properties still extracted
        let duration = track.duration_ms.unwrap();
        assert!(duration > 0, "duration should be positive, got {duration}");
        assert!(track.modified_at > 0);

        // Fingerprint on by default
        let fp = track.content_fingerprint.unwrap();
        assert_eq!(fp.len(), 64);
    }

    #[tokio::test]
    async fn test_fingerprinting_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silence.wav");
        write_wav(&path);

        let extractor = MetadataExtractor::new().fingerprinting(false);
        let track = extractor.extract(&locator(&path)).await.unwrap();

        assert_eq!(track.content_fingerprint, None);
    }

    #[tokio::test]
    async fn test_sibling_cover_is_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silence.wav");
        write_wav(&path);
        let cover = dir.path().join("cover.jpg");
        std::fs::write(&cover, b"\xff\xd8\xff").unwrap();

        let extractor = MetadataExtractor::new();
        let track = extractor.extract(&locator(&path)).await.unwrap();

        assert_eq!(track.artwork_ref, Some(cover.display().to_string()));
    }

    #[tokio::test]
    async fn test_non_path_locator_is_unreadable() {
        let extractor = MetadataExtractor::new();
        let uri = Locator::Uri("content://media/17".to_string());

        let err = extractor.extract(&uri).await.unwrap_err();
        assert!(matches!(err, ExtractionError::UnreadableSource { .. }));
    }
}
