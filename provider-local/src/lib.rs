//! # Local Filesystem Provider
//!
//! Implements the `MediaSource` capability for directories of audio files
//! on a local disk.
//!
//! ## Overview
//!
//! This module provides:
//! - Recursive enumeration with extension filtering via `walkdir`
//! - Tag extraction through `core-metadata`
//! - Native change watching via `notify` (inotify, FSEvents,
//!   `ReadDirectoryChangesW`)

pub mod source;
pub mod watcher;

pub use source::LocalFilesystemSource;
