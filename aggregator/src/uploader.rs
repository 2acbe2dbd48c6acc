//! Concurrent upload of a plan to the table store
//!
//! Three tiers of concurrency: every table at once, up to
//! `partition_concurrency` partitions per table, and up to
//! `batch_concurrency` batches per partition. A failed request is logged and
//! counted; it never cancels its siblings.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::config::{UploadConfig, UploadMode};
use crate::metrics::{BATCHES_TOTAL, ENTITIES_UPLOADED, UPLOAD_DURATION};
use crate::planner::{Batch, UploadPlan};
use crate::storage::{TableError, TableStore};

/// Tables known to exist, so each is created at most once per process
#[derive(Debug, Default)]
pub struct TableRegistry {
    tables: Mutex<HashMap<String, Arc<OnceCell<()>>>>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `table` unless an earlier call already did. Concurrent callers
    /// for the same table wait for the first one; other tables are not held
    /// up. A failed creation is retried by the next caller.
    pub async fn ensure(&self, store: &dyn TableStore, table: &str) -> Result<(), TableError> {
        let cell = self
            .tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(table.to_string())
            .or_default()
            .clone();

        cell.get_or_try_init(|| async {
            store.create_table(table).await?;
            debug!(table = %table, "Table ready");
            Ok::<(), TableError>(())
        })
        .await?;
        Ok(())
    }
}

/// A write request that failed
#[derive(Debug, Clone)]
pub struct UploadFailure {
    pub table: String,
    pub partition_key: String,
    pub entities: usize,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct UploadReport {
    pub tables: usize,
    pub requests_ok: usize,
    pub requests_failed: usize,
    pub entities_uploaded: usize,
    pub entities_failed: usize,
    pub failures: Vec<UploadFailure>,
}

impl UploadReport {
    pub fn is_success(&self) -> bool {
        self.requests_failed == 0
    }

    fn record(&mut self, table: &str, partition_key: &str, entities: usize, result: Result<(), TableError>) {
        match result {
            Ok(()) => {
                self.requests_ok += 1;
                self.entities_uploaded += entities;
                BATCHES_TOTAL.with_label_values(&["ok"]).inc();
                ENTITIES_UPLOADED.inc_by(entities as f64);
            }
            Err(e) => {
                warn!(
                    table = %table,
                    partition = %partition_key,
                    entities,
                    error = %e,
                    "Table store write failed"
                );
                self.requests_failed += 1;
                self.entities_failed += entities;
                self.failures.push(UploadFailure {
                    table: table.to_string(),
                    partition_key: partition_key.to_string(),
                    entities,
                    error: e.to_string(),
                });
                BATCHES_TOTAL.with_label_values(&["error"]).inc();
            }
        }
    }

    fn merge(&mut self, other: UploadReport) {
        self.tables += other.tables;
        self.requests_ok += other.requests_ok;
        self.requests_failed += other.requests_failed;
        self.entities_uploaded += other.entities_uploaded;
        self.entities_failed += other.entities_failed;
        self.failures.extend(other.failures);
    }
}

pub struct Uploader {
    store: Arc<dyn TableStore>,
    config: UploadConfig,
    registry: TableRegistry,
}

impl Uploader {
    pub fn new(store: Arc<dyn TableStore>, config: UploadConfig) -> Self {
        Self {
            store,
            config,
            registry: TableRegistry::new(),
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub async fn upload(&self, plan: &UploadPlan) -> UploadReport {
        let reports = join_all(
            plan.tables
                .iter()
                .map(|(table, partitions)| self.upload_table(table, partitions)),
        )
        .await;

        let mut report = UploadReport::default();
        for r in reports {
            report.merge(r);
        }
        report
    }

    async fn upload_table(&self, table: &str, partitions: &BTreeMap<String, Vec<Batch>>) -> UploadReport {
        let report = Mutex::new(UploadReport {
            tables: 1,
            ..UploadReport::default()
        });

        if let Err(e) = self.registry.ensure(self.store.as_ref(), table).await {
            warn!(table = %table, error = %e, "Failed to create table, skipping its batches");
            let mut report = report.into_inner().unwrap_or_else(|e| e.into_inner());
            for batch in partitions.values().flatten() {
                BATCHES_TOTAL.with_label_values(&["error"]).inc();
                report.requests_failed += 1;
                report.entities_failed += batch.len();
                report.failures.push(UploadFailure {
                    table: table.to_string(),
                    partition_key: batch.partition_key.clone(),
                    entities: batch.len(),
                    error: e.to_string(),
                });
            }
            return report;
        }

        let report_ref = &report;
        match self.config.mode {
            UploadMode::Batch => {
                stream::iter(partitions.values())
                    .for_each_concurrent(self.config.partition_concurrency, |batches| async move {
                        stream::iter(batches)
                            .for_each_concurrent(self.config.batch_concurrency, |batch| async move {
                                let result = self.timed(self.store.insert_batch(table, &batch.entities)).await;
                                report_ref
                                    .lock()
                                    .unwrap_or_else(|e| e.into_inner())
                                    .record(table, &batch.partition_key, batch.len(), result);
                            })
                            .await
                    })
                    .await;
            }
            UploadMode::Single => {
                let entities = partitions
                    .values()
                    .flatten()
                    .flat_map(|batch| batch.entities.iter());
                stream::iter(entities)
                    .for_each_concurrent(self.config.partition_concurrency, |entity| async move {
                        let result = self.timed(self.store.insert_entity(table, entity)).await;
                        report_ref
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .record(table, &entity.partition_key, 1, result);
                    })
                    .await;
            }
        }

        report.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    async fn timed<F>(&self, request: F) -> Result<(), TableError>
    where
        F: std::future::Future<Output = Result<(), TableError>>,
    {
        let timer = UPLOAD_DURATION.start_timer();
        let result = request.await;
        timer.observe_duration();
        result
    }
}
