//! Table store and upload configuration

use serde::{Deserialize, Serialize};

/// API version sent in `x-ms-version`
pub const DEFAULT_API_VERSION: &str = "2015-02-21";

/// Domain suffix of the public cloud storage endpoints
pub const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableStoreConfig {
    /// Storage account name
    pub account_name: String,

    /// Base64-encoded account key
    pub account_key: String,

    /// Prefix of the monthly tables; the table name is `{prefix}{YYYYMM}`
    pub table_prefix: String,

    /// Endpoint override (e.g. a local emulator). When unset the endpoint is
    /// `https://{account}.table.{endpoint_suffix}`.
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_endpoint_suffix")]
    pub endpoint_suffix: String,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_endpoint_suffix() -> String {
    DEFAULT_ENDPOINT_SUFFIX.to_string()
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl TableStoreConfig {
    /// Base URL of the table service, without a trailing slash.
    pub fn base_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!(
                "https://{}.table.{}",
                self.account_name, self.endpoint_suffix
            ),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.account_name.is_empty() {
            anyhow::bail!("table store account name is required");
        }
        if self.account_key.is_empty() {
            anyhow::bail!("table store account key is required");
        }
        if self.table_prefix.is_empty() {
            anyhow::bail!("table prefix is required");
        }
        if !self
            .table_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric())
            || !self.table_prefix.starts_with(|c: char| c.is_ascii_alphabetic())
        {
            anyhow::bail!(
                "table prefix must be alphanumeric and start with a letter: {}",
                self.table_prefix
            );
        }
        Ok(())
    }
}

/// How consumption entities are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    /// Entity group transactions of up to `batch_size` entities
    #[default]
    Batch,
    /// One insert request per entity
    Single,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default)]
    pub mode: UploadMode,

    /// Partitions (websites) uploaded concurrently within one table
    #[serde(default = "default_partition_concurrency")]
    pub partition_concurrency: usize,

    /// Batches in flight concurrently within one partition
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,

    /// Entities per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_partition_concurrency() -> usize {
    10
}

fn default_batch_concurrency() -> usize {
    4
}

fn default_batch_size() -> usize {
    crate::MAX_BATCH_ENTITIES
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            mode: UploadMode::default(),
            partition_concurrency: default_partition_concurrency(),
            batch_concurrency: default_batch_concurrency(),
            batch_size: default_batch_size(),
        }
    }
}

impl UploadConfig {
    /// Worst-case number of requests in flight for `tables` tables.
    pub fn max_in_flight(&self, tables: usize) -> usize {
        match self.mode {
            UploadMode::Batch => tables * self.partition_concurrency * self.batch_concurrency,
            UploadMode::Single => tables * self.partition_concurrency,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.partition_concurrency == 0 || self.batch_concurrency == 0 {
            anyhow::bail!("upload concurrency limits must be greater than 0");
        }
        if self.batch_size == 0 || self.batch_size > crate::MAX_BATCH_ENTITIES {
            anyhow::bail!(
                "batch size must be between 1 and {}",
                crate::MAX_BATCH_ENTITIES
            );
        }
        Ok(())
    }
}
