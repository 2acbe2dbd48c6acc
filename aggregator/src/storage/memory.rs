//! In-process table store
//!
//! Mirrors the service rules that matter to the uploader: inserts into a
//! missing table fail, a batch is atomic and confined to one partition, and
//! duplicate keys conflict. Partitions and table creations can be marked as
//! failing to exercise error paths.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;

use super::entity::TableEntity;
use super::error::TableError;
use super::TableStore;

type Rows = BTreeMap<(String, String), TableEntity>;

#[derive(Debug, Default)]
pub struct InMemoryTableStore {
    tables: RwLock<BTreeMap<String, Rows>>,
    failing_partitions: RwLock<HashSet<String>>,
    failing_tables: RwLock<HashSet<String>>,
    latency: Option<Duration>,
    create_calls: AtomicUsize,
    write_requests: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Decrements the in-flight gauge when a request finishes
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn service_error(status: u16, code: &str, message: &str) -> TableError {
    TableError::Service {
        status,
        code: code.to_string(),
        message: message.to_string(),
    }
}

impl InMemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every write request for `latency` so concurrent requests overlap.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Reject all future writes to `partition_key`.
    pub fn fail_partition(&self, partition_key: &str) {
        self.failing_partitions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(partition_key.to_string());
    }

    /// Reject every future attempt to create `table`.
    pub fn fail_table_create(&self, table: &str) {
        self.failing_tables
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(table.to_string());
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Entities of a table ordered by partition and row key.
    pub fn entities(&self, table: &str) -> Vec<TableEntity> {
        self.tables
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn entity_count(&self) -> usize {
        self.tables
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|rows| rows.len())
            .sum()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn write_requests(&self) -> usize {
        self.write_requests.load(Ordering::SeqCst)
    }

    /// Highest number of write requests observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> InFlight<'_> {
        self.write_requests.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        guard
    }

    fn check_partition(&self, partition_key: &str) -> Result<(), TableError> {
        let failing = self
            .failing_partitions
            .read()
            .unwrap_or_else(|e| e.into_inner());
        if failing.contains(partition_key) {
            return Err(service_error(
                500,
                "InternalError",
                "The server encountered an internal error.",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl TableStore for InMemoryTableStore {
    async fn create_table(&self, table: &str) -> Result<(), TableError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_tables
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(table);
        if failing {
            return Err(service_error(
                500,
                "InternalError",
                "The server encountered an internal error.",
            ));
        }
        self.tables
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(table.to_string())
            .or_default();
        Ok(())
    }

    async fn insert_entity(&self, table: &str, entity: &TableEntity) -> Result<(), TableError> {
        let _guard = self.enter().await;
        self.check_partition(&entity.partition_key)?;

        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| service_error(404, "TableNotFound", "The table specified does not exist."))?;
        let key = (entity.partition_key.clone(), entity.row_key.clone());
        if rows.contains_key(&key) {
            return Err(service_error(
                409,
                "EntityAlreadyExists",
                "The specified entity already exists.",
            ));
        }
        rows.insert(key, entity.clone());
        Ok(())
    }

    async fn insert_batch(&self, table: &str, entities: &[TableEntity]) -> Result<(), TableError> {
        let _guard = self.enter().await;

        let partitions: HashSet<&str> = entities.iter().map(|e| e.partition_key.as_str()).collect();
        if partitions.len() > 1 {
            return Err(TableError::InvalidBatch(format!(
                "batch spans {} partitions",
                partitions.len()
            )));
        }
        if entities.len() > crate::MAX_BATCH_ENTITIES {
            return Err(TableError::InvalidBatch(format!(
                "batch holds {} entities",
                entities.len()
            )));
        }
        for partition in partitions {
            self.check_partition(partition)?;
        }

        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| service_error(404, "TableNotFound", "The table specified does not exist."))?;

        // All or nothing
        let mut seen = HashSet::new();
        for entity in entities {
            let key = (entity.partition_key.clone(), entity.row_key.clone());
            if rows.contains_key(&key) || !seen.insert(key) {
                return Err(service_error(
                    409,
                    "EntityAlreadyExists",
                    "0:The specified entity already exists.",
                ));
            }
        }
        for entity in entities {
            rows.insert(
                (entity.partition_key.clone(), entity.row_key.clone()),
                entity.clone(),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_requires_table() {
        let store = InMemoryTableStore::new();
        let err = store
            .insert_entity("t", &TableEntity::new("1", "a"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("TableNotFound"));

        store.create_table("t").await.unwrap();
        store.create_table("t").await.unwrap();
        store
            .insert_entity("t", &TableEntity::new("1", "a"))
            .await
            .unwrap();
        assert_eq!(store.entities("t").len(), 1);
        assert_eq!(store.create_calls(), 2);
    }

    #[tokio::test]
    async fn test_batch_is_atomic() {
        let store = InMemoryTableStore::new();
        store.create_table("t").await.unwrap();
        store
            .insert_entity("t", &TableEntity::new("1", "b"))
            .await
            .unwrap();

        let batch = vec![TableEntity::new("1", "a"), TableEntity::new("1", "b")];
        let err = store.insert_batch("t", &batch).await.unwrap_err();
        assert_eq!(err.status(), Some(409));
        assert_eq!(store.entity_count(), 1);

        let mixed = vec![TableEntity::new("1", "c"), TableEntity::new("2", "d")];
        assert!(matches!(
            store.insert_batch("t", &mixed).await,
            Err(TableError::InvalidBatch(_))
        ));
    }

    #[tokio::test]
    async fn test_failing_partition() {
        let store = InMemoryTableStore::new();
        store.create_table("t").await.unwrap();
        store.fail_partition("9");
        let err = store
            .insert_batch("t", &[TableEntity::new("9", "a")])
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(store.write_requests(), 1);
    }

    #[tokio::test]
    async fn test_failing_table_create() {
        let store = InMemoryTableStore::new();
        store.fail_table_create("t");
        let err = store.create_table("t").await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert!(store.table_names().is_empty());
        store.create_table("u").await.unwrap();
        assert_eq!(store.table_names(), vec!["u".to_string()]);
        assert_eq!(store.create_calls(), 2);
    }
}
