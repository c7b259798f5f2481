//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the sync engine:
//! - Logging and tracing infrastructure
//! - Engine configuration and validation
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the other engine crates depend
//! on. It establishes the logging conventions and the fail-fast
//! configuration surface through which a host assembles the engine.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{EngineConfig, EngineConfigBuilder, SourceDefinition, SourceVariantConfig};
pub use error::{Error, Result};
