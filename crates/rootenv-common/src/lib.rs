//! rootenv common types and errors.
//!
//! This crate provides foundational types shared across rootenv crates:
//! - Unified error type with stable codes
//! - Output formats
//! - Schema versioning for JSON payloads

pub mod error;
pub mod output;

pub use error::{Error, ErrorCategory, Result, StructuredError};
pub use output::OutputFormat;

/// Schema version stamped into every JSON payload emitted by the CLI.
pub const SCHEMA_VERSION: &str = "1.0.0";
