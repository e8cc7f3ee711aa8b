mod cosmos;
mod credential;
mod memory;

pub use cosmos::CosmosStore;
pub use memory::MemoryStore;

use crate::config::{Config, StoreBackend};
use crate::errors::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn ensure_database(&self, database: &str) -> Result<()>;

    async fn ensure_container(
        &self,
        database: &str,
        container: &str,
        partition_key_path: &str,
    ) -> Result<()>;

    /// Inserts a new document. Fails with [`Error::Conflict`] if a document
    /// with the same `id` already exists in the partition.
    async fn create_item(
        &self,
        database: &str,
        container: &str,
        partition_key: &str,
        document: &Value,
    ) -> Result<()>;
}

pub fn build_store(config: &Config) -> Result<Arc<dyn DocumentStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::Cosmos => {
            let cosmos = config
                .cosmos
                .as_ref()
                .ok_or(crate::config::ConfigError::Missing("COSMOSDB_ACCOUNT_ENDPOINT"))?;
            Ok(Arc::new(CosmosStore::new(cosmos)?))
        }
    }
}

pub async fn bootstrap(store: &dyn DocumentStore, config: &Config) -> Result<()> {
    store.ensure_database(&config.database_name).await?;
    info!("Database '{}' ready", config.database_name);

    store
        .ensure_container(
            &config.database_name,
            &config.container_name,
            &config.partition_key_path,
        )
        .await?;
    info!(
        "Container '{}' ready (partition key {})",
        config.container_name, config.partition_key_path
    );

    Ok(())
}

// `/deviceId`, `/device/id`
pub(crate) fn value_at_path<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.trim_start_matches('/')
        .split('/')
        .try_fold(document, |current, segment| current.get(segment))
}

pub(crate) fn document_id(document: &Value) -> Result<&str> {
    document
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::Service {
            status: 400,
            message: "document has no id".to_string(),
        })
}
