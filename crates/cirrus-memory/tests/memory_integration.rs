#![allow(clippy::unwrap_used, clippy::expect_used)]

use cirrus_core::{ExperienceStore, MemoryRecord};
use cirrus_memory::{FileExperienceStore, InMemoryExperienceStore};
use serde_json::json;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// 1. Stores are usable behind the collaborator trait object
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stores_work_as_trait_objects() {
    let tmp = tempfile::tempdir().unwrap();
    let stores: Vec<Arc<dyn ExperienceStore>> = vec![
        Arc::new(InMemoryExperienceStore::new()),
        Arc::new(
            FileExperienceStore::open(tmp.path().join("exp.jsonl"))
                .await
                .unwrap(),
        ),
    ];

    for store in stores {
        store
            .store(
                MemoryRecord::new("learning:system", "create storage account westeurope")
                    .with_metadata("feedback", json!(0.9)),
            )
            .await
            .unwrap();
        let hits = store
            .search("learning:system", "create a storage account", 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata["feedback"], json!(0.9));
    }
}

// ---------------------------------------------------------------------------
// 2. Concurrent writers do not lose records
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_writes_are_all_kept() {
    let store = Arc::new(InMemoryExperienceStore::new());
    let mut handles = Vec::new();
    for i in 0..20 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .store(MemoryRecord::new("ns", format!("task number{i} deploy")))
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.count().await, 20);
    assert_eq!(store.search("ns", "deploy", 50).await.unwrap().len(), 20);
}
