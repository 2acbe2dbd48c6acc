//! One run over a host: read, aggregate, upload, advance the marker

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use logmeter_aggregator::metrics::HOSTS_TOTAL;
use logmeter_aggregator::{AggregateSnapshot, Aggregator, BatchPlanner, DomainMap, UploadReport, Uploader};
use logmeter_shared::{RecordFilter, ResumeMarker};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{IngestConfig, ServerConfig};
use crate::source::HostConnector;
use crate::state::StateStore;
use crate::tailer::{FileReadStats, LogTailer, TailerConfig};

/// Result of processing one host
#[derive(Debug, Clone)]
pub struct HostReport {
    pub host: String,
    pub files: Vec<FileReadStats>,
    pub lines_parsed: u64,
    pub unparsed_lines: usize,
    pub aggregate: AggregateSnapshot,
    /// `None` when the upload was skipped
    pub upload: Option<UploadReport>,
    pub marker: ResumeMarker,
    pub state_saved: bool,
}

impl HostReport {
    pub fn bytes_read(&self) -> u64 {
        self.files.iter().map(|f| f.bytes()).sum()
    }
}

pub struct Pipeline {
    connector: Arc<dyn HostConnector>,
    domains: Arc<DomainMap>,
    state: StateStore,
    ingest: IngestConfig,
    table_prefix: String,
    batch_size: usize,
    uploader: Option<Arc<Uploader>>,
    require_upload_success: bool,
    dry_run: bool,
}

impl Pipeline {
    pub fn new(
        connector: Arc<dyn HostConnector>,
        domains: Arc<DomainMap>,
        state: StateStore,
        ingest: IngestConfig,
        table_prefix: impl Into<String>,
    ) -> Self {
        Self {
            connector,
            domains,
            state,
            ingest,
            table_prefix: table_prefix.into(),
            batch_size: logmeter_aggregator::MAX_BATCH_ENTITIES,
            uploader: None,
            require_upload_success: false,
            dry_run: false,
        }
    }

    pub fn with_uploader(mut self, uploader: Arc<Uploader>, require_upload_success: bool) -> Self {
        self.batch_size = uploader.config().batch_size;
        self.uploader = Some(uploader);
        self.require_upload_success = require_upload_success;
        self
    }

    /// Read and aggregate only: nothing is uploaded and no marker is saved.
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub async fn process_host(&self, server: &ServerConfig) -> Result<HostReport> {
        self.process_host_at(server, Utc::now()).await
    }

    /// Process one host; `run_time` goes into the row keys of this run.
    pub async fn process_host_at(&self, server: &ServerConfig, run_time: DateTime<Utc>) -> Result<HostReport> {
        let host = server.name();

        let previous = self
            .state
            .load(server.port)
            .await
            .with_context(|| format!("Cannot get state for {}", host))?;
        match &previous {
            Some(marker) => debug!(host = %host, offset = marker.bytes_read, "Resuming"),
            None => info!(host = %host, "No stored state, reading from the start"),
        }

        let source = self
            .connector
            .connect(server)
            .await
            .with_context(|| format!("Cannot connect to {}", host))?;

        let aggregator = Arc::new(Aggregator::with_filter(
            self.domains.clone(),
            RecordFilter::new(self.ingest.ignored_domains.iter().cloned()),
        ));
        let tailer = LogTailer::new(TailerConfig::new(server.log_dir.clone(), &self.ingest));
        let outcome = tailer
            .tail(source.as_ref(), previous.as_ref(), aggregator.clone())
            .await
            .with_context(|| format!("Cannot read logs for {}", host))?;

        for line in &outcome.unparsed_lines {
            debug!(host = %host, line = %line, "Unparsed line");
        }
        if !outcome.unparsed_lines.is_empty() {
            warn!(host = %host, count = outcome.unparsed_lines.len(), "Lines could not be parsed");
        }

        let aggregate = aggregator.snapshot();
        for unknown in &aggregate.unknown_domains {
            info!(
                host = %host,
                domain = %unknown.domain,
                requests = unknown.requests,
                "No website found for domain"
            );
        }

        let mut report = HostReport {
            host: host.clone(),
            lines_parsed: outcome.lines_parsed,
            unparsed_lines: outcome.unparsed_lines.len(),
            files: outcome.files,
            aggregate,
            upload: None,
            marker: outcome.marker,
            state_saved: false,
        };

        if self.dry_run {
            info!(host = %host, records = report.aggregate.records.len(), "Dry run, skipping upload and state");
            return Ok(report);
        }

        if !self.require_upload_success {
            self.save_state(server, &report.marker).await?;
            report.state_saved = true;
        }

        if let Some(uploader) = &self.uploader {
            let plan = BatchPlanner::new(&self.table_prefix, &host, run_time)
                .with_batch_size(self.batch_size)
                .plan(&report.aggregate.records);
            info!(
                host = %host,
                websites = report.aggregate.records.len(),
                batches = plan.batch_count(),
                "Saving consumption records"
            );
            let upload = uploader.upload(&plan).await;
            if !upload.is_success() {
                warn!(
                    host = %host,
                    failed = upload.requests_failed,
                    entities_failed = upload.entities_failed,
                    "Some consumption records were not saved"
                );
            }
            report.upload = Some(upload);
        }

        if self.require_upload_success {
            if report.upload.as_ref().map_or(true, |u| u.is_success()) {
                self.save_state(server, &report.marker).await?;
                report.state_saved = true;
            } else {
                warn!(host = %host, "Keeping previous state, the unsaved range is read again next run");
            }
        }

        Ok(report)
    }

    async fn save_state(&self, server: &ServerConfig, marker: &ResumeMarker) -> Result<()> {
        self.state
            .save(server.port, marker)
            .await
            .with_context(|| format!("Cannot save state for {}", server.name()))
    }

    /// Process every server concurrently, one task per host.
    pub async fn run_all(self: &Arc<Self>, servers: Vec<ServerConfig>) -> Vec<(String, Result<HostReport>)> {
        let mut tasks = JoinSet::new();
        for server in servers {
            let pipeline = self.clone();
            tasks.spawn(async move {
                let result = pipeline.process_host(&server).await;
                (server.name(), result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((host, result)) => {
                    match &result {
                        Ok(report) => {
                            HOSTS_TOTAL.with_label_values(&["ok"]).inc();
                            info!(
                                host = %host,
                                bytes = report.bytes_read(),
                                lines = report.lines_parsed,
                                "Logs processed"
                            );
                        }
                        Err(e) => {
                            HOSTS_TOTAL.with_label_values(&["error"]).inc();
                            error!(host = %host, error = %format!("{e:#}"), "Host run failed");
                        }
                    }
                    results.push((host, result));
                }
                Err(e) => {
                    HOSTS_TOTAL.with_label_values(&["error"]).inc();
                    error!(error = %e, "Host task panicked");
                }
            }
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }
}
