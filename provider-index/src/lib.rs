//! # Platform Index Provider
//!
//! Implements the `MediaSource` capability on top of a host-provided
//! platform content index.
//!
//! ## Overview
//!
//! This module provides:
//! - Lazy paged enumeration over the index
//! - Lookup-based extraction, re-normalizing whatever the index returns
//! - Change watching when the host index exposes a change feed

pub mod source;

pub use source::PlatformIndexSource;
