//! Inspect command implementation

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use logmeter_agent::parse_line;
use logmeter_shared::{ConsumptionRecord, RecordFilter};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::output;

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Access log file to read
    pub file: PathBuf,

    /// Show only the N domains with the most traffic
    #[arg(short, long)]
    pub top: Option<usize>,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DomainTotals {
    pub domain: String,
    pub requests: u64,
    pub bytes: u64,
    pub files: u64,
    pub dynamic: u64,
    pub other: u64,
}

impl DomainTotals {
    fn new(domain: String, usage: &ConsumptionRecord) -> Self {
        Self {
            domain,
            requests: usage.total_requests(),
            bytes: usage.total_bytes(),
            files: usage.files,
            dynamic: usage.dynamic,
            other: usage.other,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct LogSummary {
    pub lines: u64,
    pub unparsed: u64,
    pub ignored: u64,
    /// Sorted by bytes, highest first
    pub domains: Vec<DomainTotals>,
}

/// Tally every line of `reader` per domain and traffic class.
pub async fn summarize<R: AsyncBufRead + Unpin>(reader: R) -> std::io::Result<LogSummary> {
    let filter = RecordFilter::default();
    let mut summary = LogSummary::default();
    let mut domains: HashMap<String, ConsumptionRecord> = HashMap::new();

    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        summary.lines += 1;
        let record = match parse_line(&line) {
            Ok(record) => record,
            Err(_) => {
                summary.unparsed += 1;
                continue;
            }
        };
        if filter.should_ignore(&record) {
            summary.ignored += 1;
            continue;
        }

        domains
            .entry(record.domain.to_lowercase())
            .or_default()
            .add(record.traffic_class(), record.size);
    }

    summary.domains = domains
        .into_iter()
        .map(|(domain, usage)| DomainTotals::new(domain, &usage))
        .collect();
    summary
        .domains
        .sort_by(|a, b| b.bytes.cmp(&a.bytes).then_with(|| a.domain.cmp(&b.domain)));
    Ok(summary)
}

pub async fn run(args: InspectArgs) -> Result<()> {
    let file = tokio::fs::File::open(&args.file)
        .await
        .with_context(|| format!("Cannot open {}", args.file.display()))?;
    let mut summary = summarize(BufReader::new(file))
        .await
        .with_context(|| format!("Cannot read {}", args.file.display()))?;
    if let Some(top) = args.top {
        summary.domains.truncate(top);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "{:<40} {:>10} {:>12} {:>12} {:>12}",
        "DOMAIN".bold(),
        "REQUESTS".bold(),
        "FILES".bold(),
        "DYNAMIC".bold(),
        "OTHER".bold()
    );
    for d in &summary.domains {
        println!(
            "{:<40} {:>10} {:>12} {:>12} {:>12}",
            d.domain,
            d.requests,
            output::format_bytes(d.files),
            output::format_bytes(d.dynamic),
            output::format_bytes(d.other)
        );
    }

    output::info(&format!(
        "{} lines, {} ignored",
        summary.lines, summary.ignored
    ));
    if summary.unparsed > 0 {
        output::warning(&format!("{} lines could not be parsed", summary.unparsed));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(path: &str, status: u16, size: u64, domain: &str) -> String {
        format!(
            "10.0.0.1(-) \"[31/Jul/2016:22:54:30 +0400]\" \"0.1\" \"GET {path} HTTP/1.1\" \"{status}\" \"{size}\" \"{domain}\" \"-\" \"UA\"\n"
        )
    }

    #[tokio::test]
    async fn test_summarize() {
        let log = [
            line("/filestore/a.png", 200, 100, "a.com"),
            line("/", 200, 40, "A.com"),
            line("/x", 400, 5, "b.com"),
            line("/gone", 410, 1000, "b.com"),
            "broken line\n".to_string(),
            "\n".to_string(),
        ]
        .concat();

        let summary = summarize(log.as_bytes()).await.unwrap();
        assert_eq!(summary.lines, 5);
        assert_eq!(summary.unparsed, 1);
        assert_eq!(summary.ignored, 1);
        assert_eq!(summary.domains.len(), 2);
        assert_eq!(
            summary.domains[0],
            DomainTotals {
                domain: "a.com".to_string(),
                requests: 2,
                bytes: 140,
                files: 100,
                dynamic: 40,
                other: 0,
            }
        );
        assert_eq!(summary.domains[1].other, 5);
    }

    #[tokio::test]
    async fn test_inspect_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        std::fs::write(&path, line("/", 200, 1, "a.com")).unwrap();
        let args = InspectArgs {
            file: path,
            top: Some(1),
            json: true,
        };
        assert!(run(args).await.is_ok());
    }
}
