//! Hourly consumption aggregates

use super::record::TrafficClass;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Website identifier as issued by the domain directory
pub type WebsiteId = u32;

/// Traffic consumed by one website during one UTC hour
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumptionRecord {
    pub website_id: WebsiteId,

    /// Start of the hour bucket (minutes and seconds are zero)
    pub hour: DateTime<Utc>,

    pub files: u64,
    pub files_count: u64,
    pub dynamic: u64,
    pub dynamic_count: u64,
    pub other: u64,
    pub other_count: u64,
}

impl ConsumptionRecord {
    pub fn new(website_id: WebsiteId, hour: DateTime<Utc>) -> Self {
        Self {
            website_id,
            hour,
            ..Default::default()
        }
    }

    /// Add one request of `size` bytes to the given class.
    pub fn add(&mut self, class: TrafficClass, size: u64) {
        match class {
            TrafficClass::StaticFile => {
                self.files += size;
                self.files_count += 1;
            }
            TrafficClass::Dynamic => {
                self.dynamic += size;
                self.dynamic_count += 1;
            }
            TrafficClass::Other => {
                self.other += size;
                self.other_count += 1;
            }
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.files + self.dynamic + self.other
    }

    pub fn total_requests(&self) -> u64 {
        self.files_count + self.dynamic_count + self.other_count
    }
}

/// Requests for a domain with no known website
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnknownDomainCount {
    pub domain: String,
    pub requests: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_add_routes_by_class() {
        let hour = Utc.with_ymd_and_hms(2016, 7, 31, 18, 0, 0).unwrap();
        let mut record = ConsumptionRecord::new(7, hour);
        record.add(TrafficClass::StaticFile, 10);
        record.add(TrafficClass::StaticFile, 5);
        record.add(TrafficClass::Other, 3);
        record.add(TrafficClass::Dynamic, 100);

        assert_eq!(record.files, 15);
        assert_eq!(record.files_count, 2);
        assert_eq!(record.other, 3);
        assert_eq!(record.dynamic_count, 1);
        assert_eq!(record.total_bytes(), 118);
        assert_eq!(record.total_requests(), 4);
    }
}
