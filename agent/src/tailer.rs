//! Resumable, rotation-aware reading of a host's access log
//!
//! The host keeps one active file (`access.log`) and rotates it to
//! `access.log-<suffix>`, compressing older rotations. A run resumes the
//! active file at the stored offset while the newest uncompressed rotated
//! file is unchanged. When a new rotated file shows up, the file read last
//! time was rotated away: its unread tail is drained from the stored offset,
//! then the new active file is read from the start.

use std::io;
use std::sync::{Arc, Mutex};

use logmeter_aggregator::metrics::{BYTES_READ, LINES_TOTAL};
use logmeter_aggregator::Aggregator;
use logmeter_shared::{LogRecord, ResumeMarker, RotatedFile};
use thiserror::Error;
use tokio::io::AsyncBufReadExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::parser::{parse_line, ParseError};
use crate::source::{join_path, LogSource};

/// Receives every parsed record; called concurrently from parse tasks
pub trait RecordSink: Send + Sync {
    fn accept(&self, record: LogRecord);
}

impl RecordSink for Aggregator {
    fn accept(&self, record: LogRecord) {
        self.add_record(&record);
    }
}

/// Keeps every record in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    records: Mutex<Vec<LogRecord>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collected records ordered by time (parse order is not preserved).
    pub fn records(&self) -> Vec<LogRecord> {
        let mut records = self
            .records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        records.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.path.cmp(&b.path)));
        records
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordSink for CollectingSink {
    fn accept(&self, record: LogRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }
}

#[derive(Debug, Error)]
pub enum TailError {
    #[error("cannot list {dir}: {source}")]
    List { dir: String, source: io::Error },

    #[error("cannot open {path}: {source}")]
    Open { path: String, source: io::Error },

    #[error("cannot read {path} at offset {offset}: {source}")]
    Read {
        path: String,
        offset: u64,
        source: io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct TailerConfig {
    pub log_dir: String,
    pub active_log: String,
    pub rotated_prefix: String,
    pub compressed_extensions: Vec<String>,
    pub parse_concurrency: usize,
}

impl TailerConfig {
    pub fn new(log_dir: impl Into<String>, ingest: &IngestConfig) -> Self {
        Self {
            log_dir: log_dir.into(),
            active_log: ingest.active_log.clone(),
            rotated_prefix: ingest.rotated_prefix.clone(),
            compressed_extensions: ingest.compressed_extensions.clone(),
            parse_concurrency: ingest.parse_concurrency.max(1),
        }
    }

    pub fn active_path(&self) -> String {
        join_path(&self.log_dir, &self.active_log)
    }
}

/// What was consumed from one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReadStats {
    pub path: String,
    pub start_offset: u64,
    pub end_offset: u64,
    pub lines: u64,
    pub unparsed: u64,
}

impl FileReadStats {
    pub fn bytes(&self) -> u64 {
        self.end_offset - self.start_offset
    }
}

#[derive(Debug, Clone)]
pub struct TailOutcome {
    /// Marker to persist once the run is accepted
    pub marker: ResumeMarker,
    pub unparsed_lines: Vec<String>,
    pub lines_parsed: u64,
    pub files: Vec<FileReadStats>,
}

struct FileRead {
    stats: FileReadStats,
    parsed: u64,
    unparsed_lines: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LogTailer {
    config: TailerConfig,
}

impl LogTailer {
    pub fn new(config: TailerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TailerConfig {
        &self.config
    }

    fn is_rotated_name(&self, name: &str) -> bool {
        name.starts_with(&self.config.rotated_prefix)
            && !self
                .config
                .compressed_extensions
                .iter()
                .any(|ext| name.ends_with(ext.as_str()))
    }

    /// Newest uncompressed rotated file in the log directory.
    pub async fn find_rotated(&self, source: &dyn LogSource) -> Result<Option<RotatedFile>, TailError> {
        let entries = source
            .list_dir(&self.config.log_dir)
            .await
            .map_err(|source| TailError::List {
                dir: self.config.log_dir.clone(),
                source,
            })?;

        Ok(entries
            .into_iter()
            .filter(|e| e.is_file && self.is_rotated_name(&e.name))
            .max_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.name.cmp(&b.name)))
            .map(|e| RotatedFile::new(e.path, e.modified)))
    }

    /// Read everything new since `previous`, delivering records to `sink`.
    /// Any I/O failure aborts the run; the caller keeps its old marker.
    pub async fn tail(
        &self,
        source: &dyn LogSource,
        previous: Option<&ResumeMarker>,
        sink: Arc<dyn RecordSink>,
    ) -> Result<TailOutcome, TailError> {
        let rotated = self.find_rotated(source).await?;
        let active_path = self.config.active_path();
        let mut reads = Vec::new();

        let active_start = match previous {
            Some(marker) if marker.same_rotation(rotated.as_ref()) => {
                let len = source
                    .stat(&active_path)
                    .await
                    .map_err(|source| TailError::Open {
                        path: active_path.clone(),
                        source,
                    })?
                    .len;
                if len < marker.bytes_read {
                    warn!(
                        path = %active_path,
                        stored_offset = marker.bytes_read,
                        len,
                        "Active log is shorter than the stored offset, reading from the start"
                    );
                    0
                } else {
                    marker.bytes_read
                }
            }
            _ => {
                if let Some(rotated) = &rotated {
                    let offset = previous.map(|m| m.bytes_read).unwrap_or(0);
                    info!(
                        rotated = %rotated.path,
                        offset,
                        "Log rotated since last run, draining rotated file"
                    );
                    reads.push(self.read_file(source, &rotated.path, offset, false, sink.clone()).await?);
                }
                0
            }
        };

        let active = self
            .read_file(source, &active_path, active_start, true, sink)
            .await?;
        let marker = ResumeMarker::new(rotated, active.stats.end_offset);
        reads.push(active);

        let mut outcome = TailOutcome {
            marker,
            unparsed_lines: Vec::new(),
            lines_parsed: 0,
            files: Vec::with_capacity(reads.len()),
        };
        for read in reads {
            outcome.lines_parsed += read.parsed;
            outcome.unparsed_lines.extend(read.unparsed_lines);
            outcome.files.push(read.stats);
        }
        Ok(outcome)
    }

    /// Read `path` from `offset` to the end. With `complete_lines_only` an
    /// unterminated final line is left for the next run.
    async fn read_file(
        &self,
        source: &dyn LogSource,
        path: &str,
        offset: u64,
        complete_lines_only: bool,
        sink: Arc<dyn RecordSink>,
    ) -> Result<FileRead, TailError> {
        let mut reader = source
            .open_at(path, offset)
            .await
            .map_err(|source| TailError::Open {
                path: path.to_string(),
                source,
            })?;

        let semaphore = Arc::new(Semaphore::new(self.config.parse_concurrency));
        let mut tasks: JoinSet<Result<(), (String, ParseError)>> = JoinSet::new();
        let mut unparsed_lines = Vec::new();
        let mut parsed = 0u64;
        let mut lines = 0u64;
        let mut consumed = 0u64;
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let n = reader
                .read_until(b'\n', &mut buf)
                .await
                .map_err(|source| TailError::Read {
                    path: path.to_string(),
                    offset: offset + consumed,
                    source,
                })?;
            if n == 0 {
                break;
            }
            if complete_lines_only && buf.last() != Some(&b'\n') {
                debug!(path = %path, bytes = n, "Leaving partial line for the next run");
                break;
            }
            consumed += n as u64;

            let line = String::from_utf8_lossy(&buf)
                .trim_end_matches(['\r', '\n'])
                .to_string();
            if line.trim().is_empty() {
                continue;
            }
            lines += 1;

            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let sink = sink.clone();
            tasks.spawn(async move {
                let _permit = permit;
                match parse_line(&line) {
                    Ok(record) => {
                        sink.accept(record);
                        Ok(())
                    }
                    Err(e) => Err((line, e)),
                }
            });

            while let Some(result) = tasks.try_join_next() {
                tally(result, &mut parsed, &mut unparsed_lines);
            }
        }

        // Every record of this file is in the sink before the offset counts
        while let Some(result) = tasks.join_next().await {
            tally(result, &mut parsed, &mut unparsed_lines);
        }

        BYTES_READ.inc_by(consumed as f64);
        LINES_TOTAL.with_label_values(&["parsed"]).inc_by(parsed as f64);
        LINES_TOTAL
            .with_label_values(&["unparsed"])
            .inc_by(unparsed_lines.len() as f64);
        debug!(
            path = %path,
            start = offset,
            bytes = consumed,
            lines,
            unparsed = unparsed_lines.len(),
            "Read log file"
        );

        Ok(FileRead {
            stats: FileReadStats {
                path: path.to_string(),
                start_offset: offset,
                end_offset: offset + consumed,
                lines,
                unparsed: unparsed_lines.len() as u64,
            },
            parsed,
            unparsed_lines,
        })
    }
}

fn tally(
    result: Result<Result<(), (String, ParseError)>, tokio::task::JoinError>,
    parsed: &mut u64,
    unparsed_lines: &mut Vec<String>,
) {
    match result {
        Ok(Ok(())) => *parsed += 1,
        Ok(Err((line, e))) => {
            debug!(error = %e, "Unparsed line");
            unparsed_lines.push(line);
        }
        Err(e) => warn!(error = %e, "Parse task failed"),
    }
}
