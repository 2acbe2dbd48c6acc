//! Aggregation of access log records into hourly consumption
//!
//! `Aggregator::add_record` is called concurrently from every line parsing
//! task of a host run. Buckets are keyed by `(website, hour)`; each bucket is
//! an `Arc` of atomic counters inserted exactly once under the write lock, so
//! two tasks touching a new key at the same time share one bucket and neither
//! increment is lost.

use logmeter_shared::utils::time::truncate_to_hour;
use logmeter_shared::{
    ConsumptionRecord, LogRecord, RecordFilter, TrafficClass, UnknownDomainCount, WebsiteId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, TimeZone, Utc};

/// Lower-cased domain name to website id
pub type DomainMap = HashMap<String, WebsiteId>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BucketKey {
    website_id: WebsiteId,
    hour: i64,
}

#[derive(Debug, Default)]
struct BucketCounters {
    bytes: [AtomicU64; 3],
    requests: [AtomicU64; 3],
}

fn class_index(class: TrafficClass) -> usize {
    match class {
        TrafficClass::StaticFile => 0,
        TrafficClass::Dynamic => 1,
        TrafficClass::Other => 2,
    }
}

impl BucketCounters {
    fn add(&self, class: TrafficClass, size: u64) {
        let i = class_index(class);
        self.bytes[i].fetch_add(size, Ordering::Relaxed);
        self.requests[i].fetch_add(1, Ordering::Relaxed);
    }

    fn to_record(&self, key: BucketKey) -> ConsumptionRecord {
        let load = |counters: &[AtomicU64; 3], class| counters[class_index(class)].load(Ordering::Relaxed);
        let hour: DateTime<Utc> = Utc
            .timestamp_opt(key.hour, 0)
            .single()
            .unwrap_or_default();
        ConsumptionRecord {
            website_id: key.website_id,
            hour,
            files: load(&self.bytes, TrafficClass::StaticFile),
            files_count: load(&self.requests, TrafficClass::StaticFile),
            dynamic: load(&self.bytes, TrafficClass::Dynamic),
            dynamic_count: load(&self.requests, TrafficClass::Dynamic),
            other: load(&self.bytes, TrafficClass::Other),
            other_count: load(&self.requests, TrafficClass::Other),
        }
    }
}

/// What happened to a record passed to `add_record`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Aggregated(WebsiteId, TrafficClass),
    /// Dropped by the status/domain filter
    Ignored,
    /// Domain has no website mapping
    UnknownDomain,
}

/// Point-in-time copy of the aggregation state
#[derive(Debug, Clone, Default)]
pub struct AggregateSnapshot {
    /// Sorted by website id, then hour
    pub records: Vec<ConsumptionRecord>,
    /// Sorted by request count, highest first
    pub unknown_domains: Vec<UnknownDomainCount>,
    pub ignored: u64,
}

/// Concurrent hourly consumption accumulator for one host run
#[derive(Debug)]
pub struct Aggregator {
    domains: Arc<DomainMap>,
    filter: RecordFilter,
    buckets: RwLock<HashMap<BucketKey, Arc<BucketCounters>>>,
    unknown: Mutex<HashMap<String, u64>>,
    ignored: AtomicU64,
}

impl Aggregator {
    pub fn new(domains: Arc<DomainMap>) -> Self {
        Self::with_filter(domains, RecordFilter::default())
    }

    pub fn with_filter(domains: Arc<DomainMap>, filter: RecordFilter) -> Self {
        Self {
            domains,
            filter,
            buckets: RwLock::new(HashMap::new()),
            unknown: Mutex::new(HashMap::new()),
            ignored: AtomicU64::new(0),
        }
    }

    /// Fold one record into its `(website, hour)` bucket.
    pub fn add_record(&self, record: &LogRecord) -> Disposition {
        if self.filter.should_ignore(record) {
            self.ignored.fetch_add(1, Ordering::Relaxed);
            crate::metrics::RECORDS_TOTAL
                .with_label_values(&["ignored"])
                .inc();
            return Disposition::Ignored;
        }

        let domain = record.domain.to_ascii_lowercase();
        let Some(&website_id) = self.domains.get(&domain) else {
            let mut unknown = self.unknown.lock().unwrap_or_else(|e| e.into_inner());
            *unknown.entry(domain).or_insert(0) += 1;
            crate::metrics::RECORDS_TOTAL
                .with_label_values(&["unknown_domain"])
                .inc();
            return Disposition::UnknownDomain;
        };

        let key = BucketKey {
            website_id,
            hour: truncate_to_hour(record.time).timestamp(),
        };
        let class = record.traffic_class();
        self.bucket(key).add(class, record.size);
        crate::metrics::RECORDS_TOTAL
            .with_label_values(&["aggregated"])
            .inc();
        Disposition::Aggregated(website_id, class)
    }

    fn bucket(&self, key: BucketKey) -> Arc<BucketCounters> {
        {
            let buckets = self.buckets.read().unwrap_or_else(|e| e.into_inner());
            if let Some(bucket) = buckets.get(&key) {
                return bucket.clone();
            }
        }
        let mut buckets = self.buckets.write().unwrap_or_else(|e| e.into_inner());
        buckets.entry(key).or_default().clone()
    }

    /// Number of `(website, hour)` buckets seen so far.
    pub fn len(&self) -> usize {
        self.buckets
            .read()
            .map(|b| b.len())
            .unwrap_or_else(|e| e.into_inner().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> AggregateSnapshot {
        let mut records: Vec<ConsumptionRecord> = {
            let buckets = self.buckets.read().unwrap_or_else(|e| e.into_inner());
            buckets
                .iter()
                .map(|(key, counters)| counters.to_record(*key))
                .collect()
        };
        records.sort_by(|a, b| (a.website_id, a.hour).cmp(&(b.website_id, b.hour)));

        let mut unknown_domains: Vec<UnknownDomainCount> = {
            let unknown = self.unknown.lock().unwrap_or_else(|e| e.into_inner());
            unknown
                .iter()
                .map(|(domain, &requests)| UnknownDomainCount {
                    domain: domain.clone(),
                    requests,
                })
                .collect()
        };
        unknown_domains.sort_by(|a, b| {
            b.requests
                .cmp(&a.requests)
                .then_with(|| a.domain.cmp(&b.domain))
        });

        AggregateSnapshot {
            records,
            unknown_domains,
            ignored: self.ignored.load(Ordering::Relaxed),
        }
    }
}
