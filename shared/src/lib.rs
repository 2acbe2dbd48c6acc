//! Shared types and utilities for logmeter
//!
//! This crate contains the data model passed between the log tailer, the
//! aggregator and the table store upload path.

pub mod types;
pub mod utils;

// Re-export commonly used types
pub use types::{consumption::*, marker::*, record::*};
