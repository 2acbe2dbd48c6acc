//! Access log ingestion
//!
//! Reads each host's nginx access log incrementally, surviving rotation,
//! parses lines concurrently into an [`Aggregator`](logmeter_aggregator::Aggregator)
//! and hands the hourly totals to the uploader.

pub mod config;
pub mod domains;
pub mod parser;
pub mod pipeline;
pub mod source;
pub mod state;
pub mod tailer;

pub use config::Settings;
pub use domains::{DomainDirectory, HttpDomainDirectory, StaticDomainDirectory};
pub use parser::{parse_line, ParseError};
pub use pipeline::{HostReport, Pipeline};
pub use source::{HostConnector, LocalConnector, LocalLogSource, LogSource};
pub use state::{StateError, StateStore};
pub use tailer::{CollectingSink, LogTailer, RecordSink, TailError, TailOutcome, TailerConfig};
