//! # Metadata Extraction Module
//!
//! Extracts tag metadata and audio properties from media files.
//!
//! ## Overview
//!
//! This module handles:
//! - Audio tag extraction (ID3, Vorbis, MP4, FLAC)
//! - Text normalization (trim, collapse whitespace, absent over empty)
//! - Content fingerprinting for change detection
//! - Sidecar artwork discovery next to the audio file

pub mod artwork;
pub mod extractor;

pub use artwork::find_sibling_artwork;
pub use extractor::{normalize_text, MetadataExtractor, EMBEDDED_ARTWORK_REF};
