//! Run command implementation

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use logmeter_agent::{domains, HostReport, LocalConnector, Pipeline, Settings, StateStore};
use logmeter_aggregator::metrics::encode_metrics;
use logmeter_aggregator::storage::{TableClient, TableStore};
use logmeter_aggregator::Uploader;
use tracing::info;

use crate::output;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Only process these hosts (`address` or `address:port`); repeatable
    #[arg(long = "host")]
    pub hosts: Vec<String>,

    /// Read and aggregate without uploading or saving state
    #[arg(long)]
    pub dry_run: bool,

    /// Write Prometheus metrics here after the run
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,
}

pub async fn run(args: RunArgs, config: Option<&Path>) -> Result<()> {
    let settings = Settings::load(config)?;
    let servers = settings.select_servers(&args.hosts);
    if servers.is_empty() {
        anyhow::bail!("No configured server matches {:?}", args.hosts);
    }

    let directory = domains::from_config(&settings.websites).context("Invalid websites settings")?;
    let domain_map = directory
        .fetch()
        .await
        .context("Cannot get the website list")?;
    info!(domains = domain_map.len(), "Loaded website domains");

    let mut pipeline = Pipeline::new(
        Arc::new(LocalConnector),
        Arc::new(domain_map),
        StateStore::new(&settings.state.dir),
        settings.ingest.clone(),
        settings.table_store.table_prefix.clone(),
    );
    if args.dry_run {
        pipeline = pipeline.dry_run();
    } else {
        let client: Arc<dyn TableStore> = Arc::new(
            TableClient::new(&settings.table_store).context("Invalid table store settings")?,
        );
        let uploader = Arc::new(Uploader::new(client, settings.upload.clone()));
        pipeline = pipeline.with_uploader(uploader, settings.state.require_upload_success);
    }

    let results = Arc::new(pipeline).run_all(servers).await;

    let mut failed = 0;
    for (host, result) in &results {
        match result {
            Ok(report) => print_report(report),
            Err(e) => {
                failed += 1;
                output::error(&format!("{}: {:#}", host.bold(), e));
            }
        }
    }

    if let Some(path) = &args.metrics_file {
        std::fs::write(path, encode_metrics())
            .with_context(|| format!("Cannot write metrics to {}", path.display()))?;
    }

    if failed > 0 {
        anyhow::bail!("{} of {} hosts failed", failed, results.len());
    }
    Ok(())
}

fn print_report(report: &HostReport) {
    let records = &report.aggregate.records;
    let summary = format!(
        "{}: {} read, {} lines, {} website-hours ({} requests, {} served)",
        report.host.bold(),
        output::format_bytes(report.bytes_read()),
        report.lines_parsed,
        records.len(),
        records.iter().map(|r| r.total_requests()).sum::<u64>(),
        output::format_bytes(records.iter().map(|r| r.total_bytes()).sum())
    );

    match &report.upload {
        Some(upload) if upload.is_success() => output::success(&format!(
            "{}, {} entities uploaded",
            summary, upload.entities_uploaded
        )),
        Some(upload) => output::warning(&format!(
            "{}, {} entities uploaded, {} failed in {} requests",
            summary, upload.entities_uploaded, upload.entities_failed, upload.requests_failed
        )),
        None => output::info(&format!("{} (dry run)", summary)),
    }

    if report.unparsed_lines > 0 {
        output::warning(&format!("{} lines could not be parsed", report.unparsed_lines));
    }
    if report.upload.is_some() && !report.state_saved {
        output::warning("State not saved; the same range is read again next run");
    }
}
