//! PgIncidentStore against a live database.
//!
//! Run with: DATABASE_URL=postgresql:///incidents_test cargo test -p process-incident-core \
//!     --features postgres -- --ignored

#![cfg(feature = "postgres")]

use chrono::{TimeZone, Utc};

use process_incident_core::store_postgres::PgIncidentStore;
use process_incident_core::{DeleteField, IncidentRecord, IncidentStore};

async fn store() -> PgIncidentStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let store = PgIncidentStore::connect(&url, 2).await.unwrap();
    store.ensure_schema().await.unwrap();
    store
}

fn record(id: &str, instance: &str, definition: &str) -> IncidentRecord {
    IncidentRecord {
        id: id.to_string(),
        schema_version: Some(2),
        external_task_id: "task".to_string(),
        process_instance_id: instance.to_string(),
        process_definition_id: definition.to_string(),
        worker_id: "w".to_string(),
        error_message: "error message".to_string(),
        occurred_at: Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
        tenant_id: "tenant".to_string(),
        deployment_name: "Dn".to_string(),
    }
}

fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

#[tokio::test]
#[ignore]
async fn test_upsert_replaces_existing_row() {
    let store = store().await;
    let id = unique("inc");
    let instance = unique("pi");

    let mut first = record(&id, &instance, "d1");
    store.upsert(&first).await.unwrap();
    first.error_message = "second failure".to_string();
    store.upsert(&first).await.unwrap();

    let stored = store.get(&id).await.unwrap().unwrap();
    assert_eq!(stored, first);

    store
        .delete_where(DeleteField::ProcessInstanceId, &instance)
        .await
        .unwrap();
}

#[tokio::test]
#[ignore]
async fn test_delete_where_filters_on_column() {
    let store = store().await;
    let instance = unique("pi");
    let definition = unique("pd");

    store.upsert(&record(&unique("a"), &instance, &definition)).await.unwrap();
    store.upsert(&record(&unique("b"), &instance, "other")).await.unwrap();

    let removed = store
        .delete_where(DeleteField::ProcessDefinitionId, &definition)
        .await
        .unwrap();
    assert_eq!(removed, 1);

    let removed = store
        .delete_where(DeleteField::ProcessInstanceId, &instance)
        .await
        .unwrap();
    assert_eq!(removed, 1);

    let removed = store
        .delete_where(DeleteField::ProcessInstanceId, &instance)
        .await
        .unwrap();
    assert_eq!(removed, 0);
}
