//! Upload planning
//!
//! Turns consumption records into table entities and groups them by table,
//! then by partition (website), then into batches the service accepts as a
//! single transaction.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use logmeter_shared::utils::time::month_suffix;
use logmeter_shared::ConsumptionRecord;

use crate::storage::TableEntity;
use crate::MAX_BATCH_ENTITIES;

/// Entities of one table and one partition, written together
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub table: String,
    pub partition_key: String,
    pub entities: Vec<TableEntity>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Table name -> partition key -> batches
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadPlan {
    pub tables: BTreeMap<String, BTreeMap<String, Vec<Batch>>>,
}

impl UploadPlan {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(|t| t.as_str())
    }

    pub fn batch_count(&self) -> usize {
        self.batches().count()
    }

    pub fn entity_count(&self) -> usize {
        self.batches().map(|b| b.len()).sum()
    }

    pub fn batches(&self) -> impl Iterator<Item = &Batch> {
        self.tables
            .values()
            .flat_map(|partitions| partitions.values())
            .flatten()
    }
}

#[derive(Debug, Clone)]
pub struct BatchPlanner {
    table_prefix: String,
    host: String,
    run_time: DateTime<Utc>,
    batch_size: usize,
}

impl BatchPlanner {
    /// `host` is the server name written into row keys (`addr:port`);
    /// `run_time` is the start of the current run.
    pub fn new(table_prefix: impl Into<String>, host: impl Into<String>, run_time: DateTime<Utc>) -> Self {
        Self {
            table_prefix: table_prefix.into(),
            host: host.into(),
            run_time,
            batch_size: MAX_BATCH_ENTITIES,
        }
    }

    /// Entities per batch, clamped to `1..=100`.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_BATCH_ENTITIES);
        self
    }

    pub fn table_name(&self, record: &ConsumptionRecord) -> String {
        format!("{}{}", self.table_prefix, month_suffix(record.hour))
    }

    /// `{record_unix}-{host}-{run_unix}`. Aggregation makes `(website, hour)`
    /// unique within a run, so the key is unique per partition.
    pub fn row_key(&self, record: &ConsumptionRecord) -> String {
        format!(
            "{}-{}-{}",
            record.hour.timestamp(),
            self.host,
            self.run_time.timestamp()
        )
    }

    pub fn plan(&self, records: &[ConsumptionRecord]) -> UploadPlan {
        let mut plan = UploadPlan::default();

        for record in records {
            let table = self.table_name(record);
            let entity = TableEntity::from_consumption(record, self.row_key(record));
            let batches = plan
                .tables
                .entry(table.clone())
                .or_default()
                .entry(entity.partition_key.clone())
                .or_default();

            match batches.last_mut() {
                Some(batch) if batch.len() < self.batch_size => batch.entities.push(entity),
                _ => batches.push(Batch {
                    table,
                    partition_key: entity.partition_key.clone(),
                    entities: vec![entity],
                }),
            }
        }

        plan
    }
}
