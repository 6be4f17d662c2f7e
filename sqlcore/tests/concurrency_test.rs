//! 동시성 테스트
//!
//! `update_one`은 읽기와 쓰기가 별도 문장이라 같은 행에 대한 동시 호출이
//! 서로의 변경을 덮어쓸 수 있습니다. 아래 테스트는 그 경계를 드러내고,
//! 단일 문장 갱신(`atomic`)과 대비합니다.

use serde_json::{json, Value};
use sqlcore::service::db::core::memory::{MemoryBackend, MemoryConnector};
use sqlcore::{eq, CreateConfig, Database, ReadConfig, Service, ServiceOptions, UpdateConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

async fn counters() -> (MemoryBackend, Service<Value>, Value) {
    let store = MemoryBackend::new();
    let db = Arc::new(Database::with_connector(Arc::new(MemoryConnector::new(
        store.clone(),
    ))));
    db.connect().await.unwrap();
    let service = db
        .create_service::<Value>("counters", ServiceOptions::default())
        .unwrap();
    let row = service
        .insert_one(&json!({"value": 0}), CreateConfig::default())
        .await
        .unwrap();
    (store, service, row["id"].clone())
}

async fn current_value(service: &Service<Value>, id: &Value) -> i64 {
    let row = service
        .find_one(Some(eq("id", id.clone())), ReadConfig::default(), None)
        .await
        .unwrap()
        .unwrap();
    row["value"].as_i64().unwrap()
}

#[tokio::test]
async fn test_concurrent_update_one_loses_an_increment() {
    let (store, service, id) = counters().await;

    // both callers read the pre-image before either writes
    let held = store.hold_writes().await;
    let reads = Arc::new(AtomicUsize::new(0));
    let mut tasks = Vec::new();
    for _ in 0..2 {
        let service = service.clone();
        let reads = reads.clone();
        let id = id.clone();
        tasks.push(tokio::spawn(async move {
            service
                .update_one(
                    eq("id", id),
                    move |row: &Value| {
                        reads.fetch_add(1, Ordering::SeqCst);
                        json!({"value": row["value"].as_i64().unwrap_or(0) + 1})
                    },
                    UpdateConfig::default(),
                )
                .await
        }));
    }
    while reads.load(Ordering::SeqCst) < 2 {
        tokio::task::yield_now().await;
    }
    drop(held);

    for task in tasks {
        let updated = task.await.unwrap().unwrap();
        assert_eq!(updated.map(|row| row["value"].clone()), Some(json!(1)));
    }

    // two increments were applied, one survived
    assert_eq!(current_value(&service, &id).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sequential_update_one_applies_every_increment() {
    let (_store, service, id) = counters().await;

    for _ in 0..3 {
        service
            .update_one(
                eq("id", id.clone()),
                |row: &Value| json!({"value": row["value"].as_i64().unwrap_or(0) + 1}),
                UpdateConfig::default(),
            )
            .await
            .unwrap();
    }

    assert_eq!(current_value(&service, &id).await, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_atomic_writes_all_land() {
    let (_store, service, id) = counters().await;

    let mut tasks = Vec::new();
    for i in 0..8 {
        let service = service.clone();
        let id = id.clone();
        tasks.push(tokio::spawn(async move {
            let column = format!("slot_{i}");
            let mut patch = serde_json::Map::new();
            patch.insert(column, json!(i));
            service
                .atomic()
                .update_one(eq("id", id), &patch, ReadConfig::default())
                .await
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), 1);
    }

    let row = service
        .find_one(Some(eq("id", id)), ReadConfig::default(), None)
        .await
        .unwrap()
        .unwrap();
    for i in 0..8 {
        assert_eq!(row[format!("slot_{i}")], json!(i));
    }
}
