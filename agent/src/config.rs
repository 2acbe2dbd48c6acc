//! Settings for a logmeter run
//!
//! Loaded from an optional TOML/JSON file layered with `LOGMETER__`
//! environment variables, e.g. `LOGMETER__TABLE_STORE__ACCOUNT_KEY`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use logmeter_aggregator::{TableStoreConfig, UploadConfig};
use logmeter_shared::{WebsiteId, DEFAULT_IGNORED_DOMAINS};
use serde::Deserialize;

/// Environment variable prefix for settings overrides
pub const ENV_PREFIX: &str = "LOGMETER";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub servers: Vec<ServerConfig>,
    pub websites: WebsitesConfig,
    pub table_store: TableStoreConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

/// A host whose access logs are ingested
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Log directory on the host
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// Local directory the host's filesystem is reachable under (e.g. an
    /// sshfs mount). Unset means the host's paths are local.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

fn default_port() -> u16 {
    22
}

fn default_log_dir() -> String {
    "/var/log/nginx".to_string()
}

impl ServerConfig {
    /// `address:port`, used in logs and row keys
    pub fn name(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Source of the domain -> website mapping
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum WebsitesConfig {
    Http(HttpDomainsConfig),
    Static(StaticDomainsConfig),
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpDomainsConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    /// Domains ending with this suffix get no `www.` alias
    pub service_domain_suffix: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl HttpDomainsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            anyhow::bail!("websites url was not provided");
        }
        if self.username.is_empty() {
            anyhow::bail!("websites username was not provided");
        }
        if self.password.is_empty() {
            anyhow::bail!("websites password was not provided");
        }
        if self.service_domain_suffix.is_empty() {
            anyhow::bail!("websites service domain suffix was not provided");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StaticDomainsConfig {
    #[serde(default)]
    pub domains: Vec<StaticDomain>,
    #[serde(default)]
    pub service_domain_suffix: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StaticDomain {
    pub domain: String,
    pub website_id: WebsiteId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    /// Directory holding `state_{port}.json` files
    #[serde(default = "default_state_dir")]
    pub dir: PathBuf,

    /// Only advance the resume marker when every upload succeeded
    #[serde(default)]
    pub require_upload_success: bool,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
            require_upload_success: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Lines parsed concurrently per host
    #[serde(default = "default_parse_concurrency")]
    pub parse_concurrency: usize,

    #[serde(default = "default_ignored_domains")]
    pub ignored_domains: Vec<String>,

    #[serde(default = "default_active_log")]
    pub active_log: String,

    #[serde(default = "default_rotated_prefix")]
    pub rotated_prefix: String,

    /// Rotated files with these extensions are compressed and skipped
    #[serde(default = "default_compressed_extensions")]
    pub compressed_extensions: Vec<String>,
}

fn default_parse_concurrency() -> usize {
    200
}

fn default_ignored_domains() -> Vec<String> {
    DEFAULT_IGNORED_DOMAINS.iter().map(|d| d.to_string()).collect()
}

fn default_active_log() -> String {
    "access.log".to_string()
}

fn default_rotated_prefix() -> String {
    "access.log-".to_string()
}

fn default_compressed_extensions() -> Vec<String> {
    [".gz", ".bz2", ".xz", ".zst", ".zip"]
        .iter()
        .map(|e| e.to_string())
        .collect()
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            parse_concurrency: default_parse_concurrency(),
            ignored_domains: default_ignored_domains(),
            active_log: default_active_log(),
            rotated_prefix: default_rotated_prefix(),
            compressed_extensions: default_compressed_extensions(),
        }
    }
}

impl Settings {
    /// Load settings from `path` (if any) and the environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings: Settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .context("Failed to read settings")?
            .try_deserialize()
            .context("Invalid settings")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a string, without environment overrides.
    pub fn from_contents(contents: &str, format: config::FileFormat) -> Result<Self> {
        let settings: Settings = config::Config::builder()
            .add_source(config::File::from_str(contents, format))
            .build()
            .context("Failed to read settings")?
            .try_deserialize()
            .context("Invalid settings")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            anyhow::bail!("at least one server must be configured");
        }
        let mut ports = HashSet::new();
        for server in &self.servers {
            if server.address.is_empty() {
                anyhow::bail!("server address is required");
            }
            // State files are keyed by port
            if !ports.insert(server.port) {
                anyhow::bail!("servers must use distinct ports: {}", server.port);
            }
        }
        if let WebsitesConfig::Http(http) = &self.websites {
            http.validate()?;
        }
        if self.ingest.parse_concurrency == 0 {
            anyhow::bail!("parse concurrency must be greater than 0");
        }
        self.table_store.validate()?;
        self.upload.validate()?;
        Ok(())
    }

    /// Servers matching any of `hosts` by name or address; all when empty.
    pub fn select_servers(&self, hosts: &[String]) -> Vec<ServerConfig> {
        self.servers
            .iter()
            .filter(|s| hosts.is_empty() || hosts.iter().any(|h| *h == s.name() || *h == s.address))
            .cloned()
            .collect()
    }
}
