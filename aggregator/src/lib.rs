//! Aggregation and upload library
//!
//! Folds parsed access log records into hourly per-website consumption,
//! plans partition-aware batches and uploads them to the table store.

/// Maximum number of entities the table store accepts in one batch
/// transaction.
pub const MAX_BATCH_ENTITIES: usize = 100;

pub mod aggregate;
pub mod config;
pub mod metrics;
pub mod planner;
pub mod storage;
pub mod uploader;

pub use aggregate::{AggregateSnapshot, Aggregator, DomainMap};
pub use config::{TableStoreConfig, UploadConfig, UploadMode};
pub use planner::{Batch, BatchPlanner, UploadPlan};
pub use uploader::{TableRegistry, UploadFailure, UploadReport, Uploader};
