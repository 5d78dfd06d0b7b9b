//! In-memory [`IncidentStore`] for tests and single-process deployments.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::store::{IncidentStore, StoreError};
use crate::types::{DeleteField, IncidentRecord};

#[derive(Default)]
pub struct MemoryIncidentStore {
    records: RwLock<BTreeMap<String, IncidentRecord>>,
}

impl MemoryIncidentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// All records, ordered by id.
    pub async fn list(&self) -> Vec<IncidentRecord> {
        self.records.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl IncidentStore for MemoryIncidentStore {
    async fn upsert(&self, record: &IncidentRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete_where(&self, field: DeleteField, value: &str) -> Result<u64, StoreError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| !field.matches(record, value));
        Ok((before - records.len()) as u64)
    }

    async fn get(&self, id: &str) -> Result<Option<IncidentRecord>, StoreError> {
        Ok(self.records.read().await.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, instance: &str, definition: &str) -> IncidentRecord {
        IncidentRecord {
            id: id.to_string(),
            process_instance_id: instance.to_string(),
            process_definition_id: definition.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let store = MemoryIncidentStore::new();
        store.upsert(&record("a", "p1", "d1")).await.unwrap();

        let mut updated = record("a", "p1", "d1");
        updated.error_message = "second".to_string();
        store.upsert(&updated).await.unwrap();

        assert_eq!(store.len().await, 1);
        let stored = store.get("a").await.unwrap().unwrap();
        assert_eq!(stored.error_message, "second");
    }

    #[tokio::test]
    async fn test_delete_where_counts_matches() {
        let store = MemoryIncidentStore::new();
        store.upsert(&record("a", "p1", "d1")).await.unwrap();
        store.upsert(&record("b", "p1", "d2")).await.unwrap();
        store.upsert(&record("c", "p2", "d1")).await.unwrap();

        let removed = store
            .delete_where(DeleteField::ProcessDefinitionId, "d1")
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let ids: Vec<String> = store.list().await.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_without_match_is_noop() {
        let store = MemoryIncidentStore::new();
        store.upsert(&record("a", "p1", "d1")).await.unwrap();

        let removed = store
            .delete_where(DeleteField::ProcessInstanceId, "missing")
            .await
            .unwrap();
        assert_eq!(removed, 0);
        assert_eq!(store.len().await, 1);
    }
}
