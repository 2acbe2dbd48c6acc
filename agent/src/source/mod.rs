//! Access to a host's log files
//!
//! Paths are the host's own absolute paths (e.g. `/var/log/nginx/access.log`);
//! each implementation maps them onto its transport.

mod local;

use std::io;

use async_trait::async_trait;
use tokio::io::AsyncBufRead;

use crate::config::ServerConfig;

pub use local::{LocalConnector, LocalLogSource};

/// Metadata of one directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// File name without the directory
    pub name: String,
    /// Host path of the file
    pub path: String,
    pub len: u64,
    /// Modification time in Unix seconds
    pub modified: Option<i64>,
    pub is_file: bool,
}

pub type LogReader = Box<dyn AsyncBufRead + Send + Unpin>;

/// Read-only view of one host's filesystem
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Entries of a directory, in no particular order.
    async fn list_dir(&self, dir: &str) -> io::Result<Vec<FileInfo>>;

    async fn stat(&self, path: &str) -> io::Result<FileInfo>;

    /// Open a file positioned at `offset` bytes.
    async fn open_at(&self, path: &str, offset: u64) -> io::Result<LogReader>;
}

/// Opens a `LogSource` for a configured host
#[async_trait]
pub trait HostConnector: Send + Sync {
    async fn connect(&self, server: &ServerConfig) -> io::Result<Box<dyn LogSource>>;
}

/// Join a host directory and a file name.
pub fn join_path(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name)
}
