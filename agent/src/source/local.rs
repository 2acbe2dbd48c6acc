//! Log files on a local or mounted filesystem

use std::io::{self, SeekFrom};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncSeekExt, BufReader};
use tracing::debug;

use super::{join_path, FileInfo, HostConnector, LogReader, LogSource};
use crate::config::ServerConfig;

fn unix_secs(time: SystemTime) -> Option<i64> {
    time.duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs() as i64)
}

/// Connects to hosts whose filesystem is reachable under `server.root`
#[derive(Debug, Clone, Default)]
pub struct LocalConnector;

#[async_trait]
impl HostConnector for LocalConnector {
    async fn connect(&self, server: &ServerConfig) -> io::Result<Box<dyn LogSource>> {
        let source = LocalLogSource::new(server.root.clone());
        let log_dir = source.local_path(&server.log_dir);
        let meta = fs::metadata(&log_dir).await?;
        if !meta.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a directory", log_dir.display()),
            ));
        }
        debug!(host = %server.name(), dir = %log_dir.display(), "Opened local log source");
        Ok(Box::new(source))
    }
}

/// Host paths resolved against an optional local root
#[derive(Debug, Clone, Default)]
pub struct LocalLogSource {
    root: Option<PathBuf>,
}

impl LocalLogSource {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    pub fn local_path(&self, path: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(path.trim_start_matches('/')),
            None => PathBuf::from(path),
        }
    }
}

#[async_trait]
impl LogSource for LocalLogSource {
    async fn list_dir(&self, dir: &str) -> io::Result<Vec<FileInfo>> {
        let mut entries = fs::read_dir(self.local_path(dir)).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            let name = entry.file_name().to_string_lossy().into_owned();
            files.push(FileInfo {
                path: join_path(dir, &name),
                name,
                len: meta.len(),
                modified: meta.modified().ok().and_then(unix_secs),
                is_file: meta.is_file(),
            });
        }
        Ok(files)
    }

    async fn stat(&self, path: &str) -> io::Result<FileInfo> {
        let meta = fs::metadata(self.local_path(path)).await?;
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        Ok(FileInfo {
            name,
            path: path.to_string(),
            len: meta.len(),
            modified: meta.modified().ok().and_then(unix_secs),
            is_file: meta.is_file(),
        })
    }

    async fn open_at(&self, path: &str, offset: u64) -> io::Result<LogReader> {
        let mut file = fs::File::open(self.local_path(path)).await?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await?;
        }
        Ok(Box::new(BufReader::new(file)))
    }
}
