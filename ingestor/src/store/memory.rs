use super::{document_id, value_at_path, DocumentStore};
use crate::errors::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct Container {
    partition_key_path: String,
    /// Keyed by (partition key, id).
    items: HashMap<(String, String), Value>,
}

/// In-process document store for local runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    databases: RwLock<HashMap<String, HashMap<String, Container>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn ensure_database(&self, database: &str) -> Result<()> {
        let mut databases = self.databases.write().await;
        databases.entry(database.to_string()).or_default();
        Ok(())
    }

    async fn ensure_container(
        &self,
        database: &str,
        container: &str,
        partition_key_path: &str,
    ) -> Result<()> {
        let mut databases = self.databases.write().await;
        let containers = databases
            .get_mut(database)
            .ok_or_else(|| Error::NotFound(format!("database '{}'", database)))?;

        match containers.get(container) {
            Some(existing) if existing.partition_key_path != partition_key_path => {
                Err(Error::PartitionKeyMismatch(format!(
                    "container '{}' is partitioned by {}, not {}",
                    container, existing.partition_key_path, partition_key_path
                )))
            }
            Some(_) => Ok(()),
            None => {
                containers.insert(
                    container.to_string(),
                    Container {
                        partition_key_path: partition_key_path.to_string(),
                        items: HashMap::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn create_item(
        &self,
        database: &str,
        container: &str,
        partition_key: &str,
        document: &Value,
    ) -> Result<()> {
        let id = document_id(document)?;

        let mut databases = self.databases.write().await;
        let target = databases
            .get_mut(database)
            .and_then(|containers| containers.get_mut(container))
            .ok_or_else(|| Error::NotFound(format!("container '{}/{}'", database, container)))?;

        match value_at_path(document, &target.partition_key_path).and_then(Value::as_str) {
            Some(value) if value == partition_key => {}
            _ => {
                return Err(Error::PartitionKeyMismatch(format!(
                    "document value at {} does not match partition key '{}'",
                    target.partition_key_path, partition_key
                )))
            }
        }

        let key = (partition_key.to_string(), id.to_string());
        if target.items.contains_key(&key) {
            return Err(Error::Conflict(format!("{}/{}", partition_key, id)));
        }

        debug!("Stored document {} in partition {}", id, partition_key);
        target.items.insert(key, document.clone());
        Ok(())
    }
}

#[cfg(test)]
impl MemoryStore {
    pub async fn get_item(
        &self,
        database: &str,
        container: &str,
        partition_key: &str,
        id: &str,
    ) -> Option<Value> {
        let databases = self.databases.read().await;
        databases
            .get(database)?
            .get(container)?
            .items
            .get(&(partition_key.to_string(), id.to_string()))
            .cloned()
    }

    pub async fn item_count(&self, database: &str, container: &str) -> usize {
        let databases = self.databases.read().await;
        databases
            .get(database)
            .and_then(|containers| containers.get(container))
            .map_or(0, |c| c.items.len())
    }

    pub async fn partition_key_path(&self, database: &str, container: &str) -> Option<String> {
        let databases = self.databases.read().await;
        databases
            .get(database)?
            .get(container)
            .map(|c| c.partition_key_path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store_with_container() -> MemoryStore {
        let store = MemoryStore::new();
        store.ensure_database("db").await.unwrap();
        store.ensure_container("db", "c", "/deviceId").await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_create_and_read_back() {
        let store = store_with_container().await;
        let doc = json!({"id": "a", "deviceId": "dev-1", "metrics": {"t": 1}});

        store.create_item("db", "c", "dev-1", &doc).await.unwrap();

        assert_eq!(store.get_item("db", "c", "dev-1", "a").await, Some(doc));
        assert_eq!(store.item_count("db", "c").await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_in_partition_conflicts() {
        let store = store_with_container().await;
        let doc = json!({"id": "a", "deviceId": "dev-1"});

        store.create_item("db", "c", "dev-1", &doc).await.unwrap();
        let err = store.create_item("db", "c", "dev-1", &doc).await.unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(store.item_count("db", "c").await, 1);
    }

    #[tokio::test]
    async fn test_same_id_in_other_partition_is_allowed() {
        let store = store_with_container().await;

        store
            .create_item("db", "c", "dev-1", &json!({"id": "a", "deviceId": "dev-1"}))
            .await
            .unwrap();
        store
            .create_item("db", "c", "dev-2", &json!({"id": "a", "deviceId": "dev-2"}))
            .await
            .unwrap();

        assert_eq!(store.item_count("db", "c").await, 2);
    }

    #[tokio::test]
    async fn test_partition_key_must_match_document() {
        let store = store_with_container().await;
        let err = store
            .create_item("db", "c", "dev-2", &json!({"id": "a", "deviceId": "dev-1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PartitionKeyMismatch(_)));
    }

    #[tokio::test]
    async fn test_missing_container() {
        let store = MemoryStore::new();
        store.ensure_database("db").await.unwrap();
        let err = store
            .create_item("db", "nope", "dev-1", &json!({"id": "a", "deviceId": "dev-1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_container_requires_database() {
        let store = MemoryStore::new();
        let err = store.ensure_container("db", "c", "/deviceId").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_container_partition_key_cannot_change() {
        let store = store_with_container().await;
        let err = store.ensure_container("db", "c", "/site").await.unwrap_err();
        assert!(matches!(err, Error::PartitionKeyMismatch(_)));
    }
}
