//! Domain -> website directory

use std::time::Duration;

use async_trait::async_trait;
use logmeter_aggregator::DomainMap;
use logmeter_shared::WebsiteId;
use serde::Deserialize;
use thiserror::Error;

use crate::config::{HttpDomainsConfig, StaticDomainsConfig, WebsitesConfig};

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("domain directory request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("domain directory returned status {0}")]
    Status(u16),

    #[error("invalid domain directory settings: {0}")]
    Settings(String),
}

/// One entry of the directory response
#[derive(Debug, Clone, Deserialize)]
pub struct DomainEntry {
    #[serde(rename = "d")]
    pub domain: String,
    #[serde(rename = "w")]
    pub website_id: WebsiteId,
}

/// Build the lookup map: domains are lower-cased, and every domain outside
/// the service suffix also answers on its `www.` alias.
pub fn build_domain_map(
    entries: impl IntoIterator<Item = DomainEntry>,
    service_domain_suffix: Option<&str>,
) -> DomainMap {
    let suffix = service_domain_suffix.map(|s| s.to_lowercase());
    let mut map = DomainMap::new();
    for entry in entries {
        let domain = entry.domain.trim().to_lowercase();
        let is_service_domain = suffix
            .as_deref()
            .map(|s| domain.ends_with(s))
            .unwrap_or(false);
        if !is_service_domain {
            map.insert(format!("www.{}", domain), entry.website_id);
        }
        map.insert(domain, entry.website_id);
    }
    map
}

#[async_trait]
pub trait DomainDirectory: Send + Sync {
    async fn fetch(&self) -> Result<DomainMap, DomainError>;
}

/// Directory served by the control panel: a form POST with credentials
/// answered by `[{"d": domain, "w": website_id}]`
pub struct HttpDomainDirectory {
    http: reqwest::Client,
    config: HttpDomainsConfig,
}

impl HttpDomainDirectory {
    pub fn new(config: HttpDomainsConfig) -> Result<Self, DomainError> {
        config
            .validate()
            .map_err(|e| DomainError::Settings(e.to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl DomainDirectory for HttpDomainDirectory {
    async fn fetch(&self) -> Result<DomainMap, DomainError> {
        let response = self
            .http
            .post(&self.config.url)
            .form(&[
                ("username", self.config.username.as_str()),
                ("password", self.config.password.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(DomainError::Status(status.as_u16()));
        }

        let entries: Vec<DomainEntry> = response.json().await?;
        Ok(build_domain_map(
            entries,
            Some(self.config.service_domain_suffix.as_str()),
        ))
    }
}

/// Directory taken from settings
pub struct StaticDomainDirectory {
    map: DomainMap,
}

impl StaticDomainDirectory {
    pub fn new(config: &StaticDomainsConfig) -> Self {
        let entries = config.domains.iter().map(|d| DomainEntry {
            domain: d.domain.clone(),
            website_id: d.website_id,
        });
        Self {
            map: build_domain_map(entries, config.service_domain_suffix.as_deref()),
        }
    }
}

#[async_trait]
impl DomainDirectory for StaticDomainDirectory {
    async fn fetch(&self) -> Result<DomainMap, DomainError> {
        Ok(self.map.clone())
    }
}

/// Directory for the configured provider.
pub fn from_config(config: &WebsitesConfig) -> Result<Box<dyn DomainDirectory>, DomainError> {
    Ok(match config {
        WebsitesConfig::Http(http) => Box::new(HttpDomainDirectory::new(http.clone())?),
        WebsitesConfig::Static(s) => Box::new(StaticDomainDirectory::new(s)),
    })
}
