//! Access log record definitions
//!
//! A `LogRecord` is one parsed line of the nginx access log. Records are
//! immutable once produced by the parser; classification and filtering
//! happen on the aggregation side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Path prefix served by the static file storage
pub const STATIC_FILE_PREFIX: &str = "/filestore/";

/// Status code counted as "other" traffic
pub const OTHER_TRAFFIC_STATUS: u16 = 400;

/// Status code that is never aggregated
pub const IGNORED_STATUS: u16 = 410;

/// Domains that are never aggregated, regardless of status
pub const DEFAULT_IGNORED_DOMAINS: &[&str] = &["cdn.redham.ru", "*"];

/// One line of the access log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Client address with the parenthetical suffix stripped
    pub client_ip: String,

    /// Request time, normalized to UTC
    pub time: DateTime<Utc>,

    /// Request duration in seconds
    pub duration: f64,

    /// HTTP verb
    pub verb: String,

    /// Request path (may contain spaces)
    pub path: String,

    /// Response status code
    pub status: u16,

    /// Response size in bytes
    pub size: u64,

    /// Requested host name
    pub domain: String,

    pub referrer: String,
    pub user_agent: String,
}

/// Traffic class a request is billed under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrafficClass {
    /// Requests served from the file storage prefix
    StaticFile,
    /// Regular application requests
    Dynamic,
    /// Requests answered with the sentinel status
    Other,
}

impl TrafficClass {
    pub const ALL: [TrafficClass; 3] = [
        TrafficClass::StaticFile,
        TrafficClass::Dynamic,
        TrafficClass::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficClass::StaticFile => "files",
            TrafficClass::Dynamic => "dynamic",
            TrafficClass::Other => "other",
        }
    }
}

impl std::fmt::Display for TrafficClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LogRecord {
    /// Classify the record. The static file check wins over the status check.
    pub fn traffic_class(&self) -> TrafficClass {
        if self.path.starts_with(STATIC_FILE_PREFIX) {
            TrafficClass::StaticFile
        } else if self.status == OTHER_TRAFFIC_STATUS {
            TrafficClass::Other
        } else {
            TrafficClass::Dynamic
        }
    }
}

/// Drops records that must never reach aggregation
#[derive(Debug, Clone)]
pub struct RecordFilter {
    ignored_domains: Vec<String>,
}

impl Default for RecordFilter {
    fn default() -> Self {
        Self::new(DEFAULT_IGNORED_DOMAINS.iter().map(|d| d.to_string()))
    }
}

impl RecordFilter {
    pub fn new(ignored_domains: impl IntoIterator<Item = String>) -> Self {
        Self {
            ignored_domains: ignored_domains
                .into_iter()
                .map(|d| d.to_lowercase())
                .collect(),
        }
    }

    pub fn should_ignore(&self, record: &LogRecord) -> bool {
        if record.status == IGNORED_STATUS {
            return true;
        }
        self.ignored_domains
            .iter()
            .any(|d| d.eq_ignore_ascii_case(&record.domain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(path: &str, status: u16, domain: &str) -> LogRecord {
        LogRecord {
            client_ip: "10.0.0.1".to_string(),
            time: Utc.with_ymd_and_hms(2016, 7, 31, 18, 54, 30).unwrap(),
            duration: 0.1,
            verb: "GET".to_string(),
            path: path.to_string(),
            status,
            size: 100,
            domain: domain.to_string(),
            referrer: "-".to_string(),
            user_agent: "UA".to_string(),
        }
    }

    #[test]
    fn test_classification() {
        assert_eq!(
            record("/filestore/x.jpg", 200, "a.com").traffic_class(),
            TrafficClass::StaticFile
        );
        assert_eq!(
            record("/filestore/x.jpg", 400, "a.com").traffic_class(),
            TrafficClass::StaticFile
        );
        assert_eq!(record("/api", 400, "a.com").traffic_class(), TrafficClass::Other);
        assert_eq!(record("/api", 500, "a.com").traffic_class(), TrafficClass::Dynamic);
        assert_eq!(
            record("/some/file.jpg", 200, "a.com").traffic_class(),
            TrafficClass::Dynamic
        );
    }

    #[test]
    fn test_default_filter() {
        let filter = RecordFilter::default();
        assert!(filter.should_ignore(&record("/", 410, "a.com")));
        assert!(filter.should_ignore(&record("/", 200, "*")));
        assert!(filter.should_ignore(&record("/", 200, "CDN.redham.ru")));
        assert!(!filter.should_ignore(&record("/", 200, "a.com")));
        assert!(!filter.should_ignore(&record("/", 400, "a.com")));
    }
}
