pub mod memory;
pub mod models;
pub mod postgres;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::StoreBackend;

use self::{
    memory::MemoryStore,
    models::{CommandAuditEvent, DeviceRecord, DeviceUpdate, ListQuery, NewReading, StoredReading},
    postgres::PgStore,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("malformed document: {0}")]
    Document(#[from] serde_json::Error),
}

/// Document repository shared by the ingestion loop and the HTTP handlers.
///
/// Implementations must apply each call atomically: a `merge_device` either
/// lands with all of its fields or not at all.
#[async_trait]
pub trait Store: Send + Sync {
    async fn find_device(&self, key: &str) -> Result<Option<DeviceRecord>, StoreError>;

    /// Upsert: merge the update's fields into the document, creating it if needed.
    async fn merge_device(&self, key: &str, update: &DeviceUpdate) -> Result<(), StoreError>;

    async fn insert_reading(&self, reading: NewReading) -> Result<StoredReading, StoreError>;

    /// Most recent readings first, optionally for one device.
    async fn list_readings(&self, query: &ListQuery) -> Result<Vec<StoredReading>, StoreError>;

    /// Exactly one reading per device: the one with the greatest `received_at`.
    async fn latest_per_device(&self) -> Result<Vec<StoredReading>, StoreError>;

    async fn append_audit(&self, event: &CommandAuditEvent) -> Result<(), StoreError>;

    /// Most recent audit events first, optionally for one device.
    async fn list_audit(&self, query: &ListQuery) -> Result<Vec<CommandAuditEvent>, StoreError>;
}

pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Build the configured store, running migrations for Postgres.
pub async fn connect(backend: &StoreBackend) -> Result<Arc<dyn Store>> {
    match backend {
        StoreBackend::Postgres { database_url } => {
            let pool = create_pool(database_url).await?;
            run_migrations(&pool).await?;
            Ok(Arc::new(PgStore::new(pool)))
        }
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}
