//! Table store backends
//!
//! `TableClient` talks to the table service over HTTPS with Shared Key
//! authentication. `InMemoryTableStore` keeps rows in process for tests and
//! dry runs.

pub mod auth;
pub mod batch;
pub mod client;
pub mod entity;
pub mod error;
pub mod memory;

use async_trait::async_trait;

pub use auth::{AuthScheme, SharedKeySigner};
pub use batch::{BatchEncoder, BatchOperation};
pub use client::TableClient;
pub use entity::TableEntity;
pub use error::TableError;
pub use memory::InMemoryTableStore;

/// Write side of the table store used by the uploader
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Create a table. A table that already exists is not an error.
    async fn create_table(&self, table: &str) -> Result<(), TableError>;

    /// Insert one entity.
    async fn insert_entity(&self, table: &str, entity: &TableEntity) -> Result<(), TableError>;

    /// Insert up to 100 entities of one partition as a single atomic
    /// transaction.
    async fn insert_batch(&self, table: &str, entities: &[TableEntity]) -> Result<(), TableError>;
}
