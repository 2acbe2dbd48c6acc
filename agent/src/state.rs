//! Per-host resume markers on disk
//!
//! One `state_{port}.json` file per host:
//! `{"log": "/var/log/nginx/access.log-20160731", "modified": 1469923200, "read": 5120}`.
//! An empty `log` means no rotated file existed. Saves go through a
//! temporary file and a rename, so a crash never leaves a torn marker.

use std::io;
use std::path::{Path, PathBuf};

use logmeter_shared::{ResumeMarker, RotatedFile};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot access state file {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("cannot parse state file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    log: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    modified: Option<i64>,
    read: u64,
}

impl From<&ResumeMarker> for StateFile {
    fn from(marker: &ResumeMarker) -> Self {
        match &marker.rotated {
            Some(rotated) => Self {
                log: rotated.path.clone(),
                modified: rotated.modified,
                read: marker.bytes_read,
            },
            None => Self {
                log: String::new(),
                modified: None,
                read: marker.bytes_read,
            },
        }
    }
}

impl From<StateFile> for ResumeMarker {
    fn from(file: StateFile) -> Self {
        let rotated = (!file.log.is_empty()).then(|| RotatedFile::new(file.log, file.modified));
        ResumeMarker::new(rotated, file.read)
    }
}

#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, port: u16) -> PathBuf {
        self.dir.join(format!("state_{}.json", port))
    }

    /// Marker of a host, or `None` before its first successful run.
    pub async fn load(&self, port: u16) -> Result<Option<ResumeMarker>, StateError> {
        let path = self.path_for(port);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StateError::Io { path, source }),
        };
        let file: StateFile =
            serde_json::from_slice(&data).map_err(|source| StateError::Corrupt { path, source })?;
        Ok(Some(file.into()))
    }

    pub async fn save(&self, port: u16, marker: &ResumeMarker) -> Result<(), StateError> {
        let path = self.path_for(port);
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| StateError::Io { path, source }
        };

        fs::create_dir_all(&self.dir)
            .await
            .map_err(io_err(&self.dir))?;

        let data = serde_json::to_vec(&StateFile::from(marker)).map_err(|source| {
            StateError::Corrupt {
                path: path.clone(),
                source,
            }
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, data).await.map_err(io_err(&tmp))?;
        fs::rename(&tmp, &path).await.map_err(io_err(&path))?;
        Ok(())
    }

    /// All stored markers, ordered by port.
    pub async fn list(&self) -> Result<Vec<(u16, ResumeMarker)>, StateError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StateError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut ports = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|source| StateError::Io {
            path: self.dir.clone(),
            source,
        })? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let port = name
                .strip_prefix("state_")
                .and_then(|rest| rest.strip_suffix(".json"))
                .and_then(|port| port.parse::<u16>().ok());
            if let Some(port) = port {
                ports.push(port);
            }
        }
        ports.sort_unstable();

        let mut markers = Vec::with_capacity(ports.len());
        for port in ports {
            if let Some(marker) = self.load(port).await? {
                markers.push((port, marker));
            }
        }
        Ok(markers)
    }
}
