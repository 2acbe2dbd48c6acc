use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use logmeter_agent::config::{IngestConfig, ServerConfig};
use logmeter_agent::{LocalConnector, Pipeline, StateStore};
use logmeter_aggregator::storage::{InMemoryTableStore, TableStore};
use logmeter_aggregator::{DomainMap, UploadConfig, Uploader};
use serde_json::json;
use tempfile::TempDir;

const LOG_DIR: &str = "/var/log/nginx";

fn log_line(path: &str, status: u16, size: u64, domain: &str) -> String {
    format!(
        "10.0.0.1(-) \"[31/Jul/2016:22:54:30 +0400]\" \"0.100\" \"GET {path} HTTP/1.1\" \"{status}\" \"{size}\" \"{domain}\" \"-\" \"UA\"\n"
    )
}

fn sample_log() -> String {
    [
        log_line("/some/file.jpg", 200, 32327, "some-domain.com"),
        log_line("/filestore/a.jpg", 200, 100, "www.some-domain.com"),
        log_line("/api", 400, 50, "other.com"),
        log_line("/", 200, 10, "unknown.com"),
        log_line("/gone", 410, 999, "some-domain.com"),
        "garbage\n".to_string(),
    ]
    .concat()
}

fn domains() -> Arc<DomainMap> {
    let mut map = DomainMap::new();
    map.insert("some-domain.com".to_string(), 1);
    map.insert("www.some-domain.com".to_string(), 1);
    map.insert("other.com".to_string(), 2);
    Arc::new(map)
}

fn run_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2016, 8, 1, 0, 5, 0).unwrap()
}

struct Host {
    root: TempDir,
    server: ServerConfig,
}

impl Host {
    fn new(port: u16) -> Self {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("var/log/nginx")).unwrap();
        let server = ServerConfig {
            address: "10.0.0.1".to_string(),
            port,
            log_dir: LOG_DIR.to_string(),
            root: Some(root.path().to_path_buf()),
        };
        Self { root, server }
    }

    fn write_log(&self, contents: &str) {
        std::fs::write(self.root.path().join("var/log/nginx/access.log"), contents).unwrap();
    }

    fn log_len(&self) -> u64 {
        std::fs::metadata(self.root.path().join("var/log/nginx/access.log"))
            .unwrap()
            .len()
    }
}

fn pipeline(state_dir: &Path) -> Pipeline {
    Pipeline::new(
        Arc::new(LocalConnector),
        domains(),
        StateStore::new(state_dir),
        IngestConfig::default(),
        "usage",
    )
}

fn uploader(store: &Arc<InMemoryTableStore>) -> Arc<Uploader> {
    let store: Arc<dyn TableStore> = store.clone();
    Arc::new(Uploader::new(store, UploadConfig::default()))
}

#[tokio::test]
async fn test_run_uploads_and_saves_state() -> Result<()> {
    let host = Host::new(22);
    host.write_log(&sample_log());
    let state_dir = tempfile::tempdir()?;
    let store = Arc::new(InMemoryTableStore::new());
    let pipeline = pipeline(state_dir.path()).with_uploader(uploader(&store), false);

    let report = pipeline.process_host_at(&host.server, run_time()).await?;
    assert_eq!(report.lines_parsed, 5);
    assert_eq!(report.unparsed_lines, 1);
    assert_eq!(report.aggregate.ignored, 1);
    assert_eq!(report.aggregate.unknown_domains.len(), 1);
    assert_eq!(report.bytes_read(), host.log_len());
    assert!(report.state_saved);

    let upload = report.upload.expect("upload ran");
    assert!(upload.is_success());
    assert_eq!(upload.entities_uploaded, 2);

    assert_eq!(store.table_names(), vec!["usage201607".to_string()]);
    let entities = store.entities("usage201607");
    let site = entities
        .iter()
        .find(|e| e.partition_key == "1")
        .expect("website 1 entity");
    assert_eq!(site.row_key, "1469988000-10.0.0.1:22-1470009900");
    assert_eq!(site.properties["Time"], json!(1469988000));
    assert_eq!(site.properties["Dynamic"], json!(32327));
    assert_eq!(site.properties["DynamicCount"], json!(1));
    assert_eq!(site.properties["Files"], json!(100));
    let other = entities.iter().find(|e| e.partition_key == "2").unwrap();
    assert_eq!(other.properties["Other"], json!(50));
    assert_eq!(other.properties["OtherCount"], json!(1));

    let marker = StateStore::new(state_dir.path()).load(22).await?.unwrap();
    assert_eq!(marker.bytes_read, host.log_len());
    assert!(marker.rotated.is_none());
    Ok(())
}

#[tokio::test]
async fn test_second_run_without_new_lines_uploads_nothing() -> Result<()> {
    let host = Host::new(22);
    host.write_log(&sample_log());
    let state_dir = tempfile::tempdir()?;
    let store = Arc::new(InMemoryTableStore::new());
    let pipeline = pipeline(state_dir.path()).with_uploader(uploader(&store), false);

    pipeline.process_host_at(&host.server, run_time()).await?;
    let writes = store.write_requests();

    let report = pipeline.process_host_at(&host.server, run_time()).await?;
    assert_eq!(report.bytes_read(), 0);
    assert!(report.aggregate.records.is_empty());
    assert_eq!(store.write_requests(), writes);
    assert_eq!(store.entity_count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_failed_upload_keeps_state_when_required() -> Result<()> {
    let host = Host::new(22);
    host.write_log(&sample_log());
    let state_dir = tempfile::tempdir()?;
    let store = Arc::new(InMemoryTableStore::new());
    store.fail_partition("1");
    let pipeline = pipeline(state_dir.path()).with_uploader(uploader(&store), true);

    let report = pipeline.process_host_at(&host.server, run_time()).await?;
    let upload = report.upload.as_ref().unwrap();
    assert!(!upload.is_success());
    assert_eq!(upload.entities_uploaded, 1);
    assert_eq!(upload.failures[0].partition_key, "1");
    assert!(!report.state_saved);
    assert!(StateStore::new(state_dir.path()).load(22).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_failed_upload_still_advances_by_default() -> Result<()> {
    let host = Host::new(22);
    host.write_log(&sample_log());
    let state_dir = tempfile::tempdir()?;
    let store = Arc::new(InMemoryTableStore::new());
    store.fail_partition("2");
    let pipeline = pipeline(state_dir.path()).with_uploader(uploader(&store), false);

    let report = pipeline.process_host_at(&host.server, run_time()).await?;
    assert!(!report.upload.unwrap().is_success());
    assert!(report.state_saved);
    assert!(StateStore::new(state_dir.path()).load(22).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn test_dry_run_touches_nothing() -> Result<()> {
    let host = Host::new(22);
    host.write_log(&sample_log());
    let state_dir = tempfile::tempdir()?;
    let store = Arc::new(InMemoryTableStore::new());
    let pipeline = pipeline(state_dir.path())
        .with_uploader(uploader(&store), false)
        .dry_run();

    let report = pipeline.process_host_at(&host.server, run_time()).await?;
    assert_eq!(report.aggregate.records.len(), 2);
    assert!(report.upload.is_none());
    assert!(!report.state_saved);
    assert_eq!(store.write_requests(), 0);
    assert!(!state_dir.path().join("state_22.json").exists());
    Ok(())
}

#[tokio::test]
async fn test_unreachable_host_keeps_state() -> Result<()> {
    let host = Host::new(22);
    let state_dir = tempfile::tempdir()?;
    let server = ServerConfig {
        log_dir: "/missing".to_string(),
        ..host.server.clone()
    };

    let result = pipeline(state_dir.path()).process_host(&server).await;
    assert!(result.is_err());
    assert!(!state_dir.path().join("state_22.json").exists());
    Ok(())
}

#[tokio::test]
async fn test_run_all_isolates_hosts() -> Result<()> {
    let good = Host::new(2201);
    good.write_log(&sample_log());
    let bad = Host::new(2202);
    let state_dir = tempfile::tempdir()?;
    let store = Arc::new(InMemoryTableStore::new());
    let pipeline = Arc::new(pipeline(state_dir.path()).with_uploader(uploader(&store), false));

    let results = pipeline
        .run_all(vec![bad.server.clone(), good.server.clone()])
        .await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, "10.0.0.1:2201");
    assert!(results[0].1.is_ok());
    assert!(results[1].1.is_err());
    assert_eq!(store.entity_count(), 2);

    let states = StateStore::new(state_dir.path()).list().await?;
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].0, 2201);
    Ok(())
}
