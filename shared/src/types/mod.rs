//! Data model for ingestion, aggregation and upload

pub mod consumption;
pub mod marker;
pub mod record;
