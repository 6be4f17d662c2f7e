//! 테이블 서비스 통합 테스트
//!
//! 인메모리 백엔드 위에서 CRUD, 소프트 삭제, 페이지네이션, 검증을 확인합니다.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlcore::service::db::core::memory::{MemoryBackend, MemoryConnector};
use sqlcore::{
    eq, gt, gte, serde_schema, validator_fn, CreateConfig, Database, DbError, DeleteConfig,
    FindOptions, IdStrategy, OrderBy, ReadConfig, Service, ServiceOptions, UpdateConfig,
};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    id: u64,
    full_name: String,
    email: String,
    #[serde(default)]
    age: i64,
    created_at: Option<String>,
    updated_at: Option<String>,
    #[serde(default)]
    deleted_at: Option<String>,
}

#[derive(Serialize)]
struct NewUser<'a> {
    full_name: &'a str,
    email: &'a str,
    age: i64,
}

async fn connected(options: ServiceOptions) -> (MemoryBackend, Service<User>) {
    let store = MemoryBackend::new();
    let db = Arc::new(Database::with_connector(Arc::new(MemoryConnector::new(
        store.clone(),
    ))));
    db.connect().await.unwrap();
    let users = db.create_service::<User>("users", options).unwrap();
    (store, users)
}

fn auto_increment() -> ServiceOptions {
    ServiceOptions::default().with_id_strategy(IdStrategy::AutoIncrement)
}

async fn seed(users: &Service<User>, ages: &[i64]) -> Vec<User> {
    let mut inserted = Vec::new();
    for (i, age) in ages.iter().enumerate() {
        let email = format!("user{i}@example.com");
        let user = users
            .insert_one(
                &NewUser {
                    full_name: "Seed",
                    email: &email,
                    age: *age,
                },
                CreateConfig::default(),
            )
            .await
            .unwrap();
        inserted.push(user);
    }
    inserted
}

#[tokio::test]
async fn test_insert_with_auto_increment_returns_stored_row() {
    let (_store, users) = connected(auto_increment()).await;

    let user = users
        .insert_one(
            &json!({"full_name": "John Doe", "email": "john@example.com"}),
            CreateConfig::default(),
        )
        .await
        .unwrap();

    assert!(user.id > 0);
    assert!(user.created_at.is_some());
    assert_eq!(user.created_at, user.updated_at);
    assert_eq!(user.deleted_at, None);
}

#[tokio::test]
async fn test_generated_ids_are_opaque_strings() {
    let store = MemoryBackend::new();
    let db = Arc::new(Database::with_connector(Arc::new(MemoryConnector::new(
        store.clone(),
    ))));
    db.connect().await.unwrap();
    let docs = db
        .create_service::<Value>("documents", ServiceOptions::default())
        .unwrap();

    let a = docs.insert_one(&json!({"title": "a"}), CreateConfig::default()).await.unwrap();
    let b = docs.insert_one(&json!({"title": "b"}), CreateConfig::default()).await.unwrap();

    let (a_id, b_id) = (a["id"].as_str().unwrap(), b["id"].as_str().unwrap());
    assert_ne!(a_id, b_id);
    assert_eq!(store.dump("documents").len(), 2);

    let explicit = docs
        .insert_one(&json!({"id": "custom-1", "title": "c"}), CreateConfig::default())
        .await
        .unwrap();
    assert_eq!(explicit["id"], "custom-1");

    let duplicate = docs
        .insert_one(&json!({"id": "custom-1", "title": "d"}), CreateConfig::default())
        .await;
    assert!(matches!(duplicate, Err(DbError::Query(_))));
}

#[tokio::test]
async fn test_find_paginates_and_counts_matching_rows() {
    let (_store, users) = connected(auto_increment()).await;
    seed(&users, &[10, 20, 30, 40, 50]).await;

    let page = users
        .find(
            Some(gte("age", 30)),
            ReadConfig::default(),
            FindOptions::page(1, 2).order_by(OrderBy::asc("age")),
        )
        .await
        .unwrap();

    assert_eq!(page.count, 3);
    assert_eq!(page.pages_count, 2);
    assert_eq!(
        page.results.iter().map(|u| u.age).collect::<Vec<_>>(),
        vec![30, 40]
    );

    let last = users
        .find(
            Some(gte("age", 30)),
            ReadConfig::default(),
            FindOptions::page(2, 2).order_by(OrderBy::asc("age")),
        )
        .await
        .unwrap();
    assert_eq!(last.results.len(), 1);
    assert_eq!(last.results[0].age, 50);
}

#[tokio::test]
async fn test_find_without_pagination_returns_everything() {
    let (_store, users) = connected(auto_increment()).await;

    let empty = users
        .find(None, ReadConfig::default(), FindOptions::default())
        .await
        .unwrap();
    assert_eq!((empty.count, empty.pages_count), (0, 0));

    seed(&users, &[1, 2, 3]).await;
    let all = users
        .find(None, ReadConfig::default(), FindOptions::default())
        .await
        .unwrap();
    assert_eq!((all.results.len(), all.count, all.pages_count), (3, 3, 1));
}

#[tokio::test]
async fn test_find_rejects_invalid_pagination() {
    let (_store, users) = connected(auto_increment()).await;

    let zero = users
        .find(None, ReadConfig::default(), FindOptions::page(0, 10))
        .await;
    assert!(matches!(zero, Err(DbError::InvalidInput(_))));

    let page_only = FindOptions {
        page: Some(2),
        ..FindOptions::default()
    };
    let result = users.find(None, ReadConfig::default(), page_only).await;
    assert!(matches!(result, Err(DbError::InvalidInput(_))));
}

#[tokio::test]
async fn test_find_pages_without_order_visit_every_row_once() {
    for options in [auto_increment(), ServiceOptions::default()] {
        let store = MemoryBackend::new();
        let db = Arc::new(Database::with_connector(Arc::new(MemoryConnector::new(
            store.clone(),
        ))));
        db.connect().await.unwrap();
        let rows = db.create_service::<Value>("rows", options).unwrap();
        for n in 0..7 {
            rows.insert_one(&json!({"n": n}), CreateConfig::default())
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        for page in 1..=4 {
            let result = rows
                .find(None, ReadConfig::default(), FindOptions::page(page, 2))
                .await
                .unwrap();
            assert_eq!(result.pages_count, 4);
            seen.extend(result.results.iter().map(|row| row["n"].as_i64().unwrap()));
        }
        seen.sort();
        assert_eq!(seen, (0..7).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn test_update_one_without_match_returns_none() {
    let (_store, users) = connected(auto_increment()).await;
    let bus = users.db().event_bus();
    let mut events = bus.subscribe();
    seed(&users, &[10]).await;
    while events.try_recv().is_ok() {}

    let result = users
        .update_one(
            eq("email", "nobody@example.com"),
            |_| json!({"age": 99}),
            UpdateConfig::default(),
        )
        .await
        .unwrap();

    assert_eq!(result, None);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_update_one_merges_patch_and_stamps_updated_at() {
    let (_store, users) = connected(auto_increment()).await;
    let seeded = seed(&users, &[10]).await;
    let original = &seeded[0];

    let updated = users
        .update_one(
            eq("id", original.id),
            |user| json!({"age": user.age + 1, "id": 999}),
            UpdateConfig::default(),
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(updated.id, original.id);
    assert_eq!(updated.age, 11);
    assert_eq!(updated.email, original.email);
    assert_eq!(updated.created_at, original.created_at);
    assert!(updated.updated_at >= original.updated_at);
}

#[tokio::test]
async fn test_update_many_applies_function_per_row() {
    let (_store, users) = connected(auto_increment()).await;
    seed(&users, &[10, 20, 30]).await;

    let updated = users
        .update_many(gt("age", 15), |user| json!({"age": user.age * 2}), UpdateConfig::default())
        .await
        .unwrap();

    let mut ages: Vec<i64> = updated.iter().map(|u| u.age).collect();
    ages.sort();
    assert_eq!(ages, vec![40, 60]);
    assert_eq!(users.count(Some(eq("age", 10)), ReadConfig::default()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_update_many_rejected_row_rolls_back_earlier_rows() {
    let options = auto_increment().with_validator(validator_fn(|row| {
        let age = row.get("age").and_then(Value::as_i64);
        match age {
            Some(age) if age > 100 => Err(format!("age {age} is over 100")),
            _ => Ok(row),
        }
    }));
    let (store, users) = connected(options).await;
    seed(&users, &[10, 60]).await;
    let mut events = users.db().event_bus().subscribe();

    let result = users
        .update_many(gte("age", 0), |user| json!({"age": user.age * 2}), UpdateConfig::default())
        .await;

    assert!(matches!(result, Err(DbError::Validation(_))));
    let ages: Vec<i64> = store
        .dump("users")
        .iter()
        .map(|row| row["age"].as_i64().unwrap())
        .collect();
    assert_eq!(ages, vec![10, 60]);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_transaction_commit_keeps_concurrent_inserts() {
    let (store, users) = connected(auto_increment()).await;

    let (inside, outside) = users
        .db()
        .with_transaction(|tx| {
            let users = users.clone();
            async move {
                let inside = users
                    .insert_one(
                        &NewUser {
                            full_name: "Inside",
                            email: "inside@example.com",
                            age: 1,
                        },
                        CreateConfig::default().in_transaction(&tx),
                    )
                    .await?;
                let outside = users
                    .insert_one(
                        &NewUser {
                            full_name: "Outside",
                            email: "outside@example.com",
                            age: 2,
                        },
                        CreateConfig::default(),
                    )
                    .await?;
                Ok((inside, outside))
            }
        })
        .await
        .unwrap();

    assert_ne!(inside.id, outside.id);
    let mut names: Vec<String> = store
        .dump("users")
        .iter()
        .map(|row| row["full_name"].as_str().unwrap().to_string())
        .collect();
    names.sort();
    assert_eq!(names, vec!["Inside", "Outside"]);
}

#[tokio::test]
async fn test_soft_deleted_rows_are_hidden_from_reads() {
    let (store, users) = connected(auto_increment()).await;
    let seeded = seed(&users, &[10, 20]).await;
    let target = seeded[0].id;

    let deleted = users
        .delete_soft(eq("id", target), DeleteConfig::default())
        .await
        .unwrap();
    assert_eq!(deleted.len(), 1);
    assert!(deleted[0].deleted_at.is_some());

    assert_eq!(
        users.find_one(Some(eq("id", target)), ReadConfig::default(), None).await.unwrap(),
        None
    );
    assert!(!users.exists(Some(eq("id", target)), ReadConfig::default()).await.unwrap());
    assert_eq!(users.count(None, ReadConfig::default()).await.unwrap(), 1);
    assert_eq!(users.count_documents(None, ReadConfig::with_deleted()).await.unwrap(), 2);

    let visible = users
        .find_one(Some(eq("id", target)), ReadConfig::with_deleted(), None)
        .await
        .unwrap()
        .unwrap();
    assert!(visible.deleted_at.is_some());

    // the row is still stored
    assert_eq!(store.dump("users").len(), 2);

    let again = users
        .delete_soft(eq("id", target), DeleteConfig::default())
        .await
        .unwrap();
    assert!(again.is_empty());

    let untouched = users
        .update_one(eq("id", target), |_| json!({"age": 1}), UpdateConfig::default())
        .await
        .unwrap();
    assert_eq!(untouched, None);
}

#[tokio::test]
async fn test_soft_delete_filtering_can_be_disabled_per_service() {
    let options = ServiceOptions {
        skip_deleted_rows: false,
        ..auto_increment()
    };
    let (_store, users) = connected(options).await;
    let seeded = seed(&users, &[10]).await;

    users
        .delete_soft(eq("id", seeded[0].id), DeleteConfig::default())
        .await
        .unwrap();
    assert_eq!(users.count(None, ReadConfig::default()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_hard_delete_removes_rows() {
    let (store, users) = connected(auto_increment()).await;
    let seeded = seed(&users, &[10, 20, 30]).await;

    let removed = users
        .delete_one(eq("id", seeded[0].id), DeleteConfig::default())
        .await
        .unwrap();
    assert_eq!(removed.map(|u| u.id), Some(seeded[0].id));

    let removed = users
        .delete_many(gte("age", 20), DeleteConfig::default())
        .await
        .unwrap();
    assert_eq!(removed.len(), 2);
    assert!(store.dump("users").is_empty());

    let none = users
        .delete_one(eq("id", seeded[0].id), DeleteConfig::default())
        .await
        .unwrap();
    assert_eq!(none, None);
}

#[tokio::test]
async fn test_schema_validation_rejects_before_writing() {
    #[derive(Serialize, Deserialize)]
    struct UserSchema {
        full_name: String,
        email: String,
    }

    let options = auto_increment().with_validator(serde_schema::<UserSchema>());
    let (store, users) = connected(options).await;

    let rejected = users
        .insert_one(&json!({"full_name": "No Email"}), CreateConfig::default())
        .await;
    assert!(matches!(rejected, Err(DbError::Validation(_))));
    assert!(store.dump("users").is_empty());

    let skipped = users
        .insert_one(
            &json!({"full_name": "No Email", "email": "late@example.com"}),
            CreateConfig {
                validate_schema: Some(false),
                ..CreateConfig::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(skipped.full_name, "No Email");

    let bad_update = users
        .update_one(eq("id", skipped.id), |_| json!({"email": 42}), UpdateConfig::default())
        .await;
    assert!(matches!(bad_update, Err(DbError::Validation(_))));
    assert!(users.validate_schema(&json!({"full_name": "x"})).is_err());
}

#[tokio::test]
async fn test_insert_many_is_all_or_nothing() {
    let (store, users) = connected(auto_increment()).await;

    let rows = vec![
        json!({"id": 7, "full_name": "A", "email": "a@example.com"}),
        json!({"id": 7, "full_name": "B", "email": "b@example.com"}),
    ];
    let result = users.insert_many(&rows, CreateConfig::default()).await;
    assert!(matches!(result, Err(DbError::Query(_))));
    assert!(store.dump("users").is_empty());

    let rows = vec![
        json!({"full_name": "A", "email": "a@example.com"}),
        json!({"full_name": "B", "email": "b@example.com"}),
    ];
    let inserted = users.insert_many(&rows, CreateConfig::default()).await.unwrap();
    assert_eq!(inserted.len(), 2);
    assert_ne!(inserted[0].id, inserted[1].id);
}

#[tokio::test]
async fn test_atomic_updates_skip_read_modify_write() {
    let (_store, users) = connected(auto_increment()).await;
    let seeded = seed(&users, &[10, 10, 30]).await;

    let affected = users
        .atomic()
        .update_one(eq("age", 10), &json!({"full_name": "First"}), ReadConfig::default())
        .await
        .unwrap();
    assert_eq!(affected, 1);

    let affected = users
        .atomic()
        .update_many(eq("age", 10), &json!({"age": 11}), ReadConfig::default())
        .await
        .unwrap();
    assert_eq!(affected, 2);

    users
        .delete_soft(eq("id", seeded[2].id), DeleteConfig::default())
        .await
        .unwrap();
    let affected = users
        .atomic()
        .update_many(eq("age", 30), &json!({"age": 31}), ReadConfig::default())
        .await
        .unwrap();
    assert_eq!(affected, 0);
}

#[tokio::test]
async fn test_distinct_and_replace_one() {
    let (_store, users) = connected(auto_increment()).await;
    let seeded = seed(&users, &[10, 10, 20]).await;

    let mut ages = users
        .distinct("age", None, ReadConfig::default())
        .await
        .unwrap();
    ages.sort_by_key(|v| v.as_i64());
    assert_eq!(ages, vec![json!(10), json!(20)]);

    let affected = users
        .replace_one(
            eq("id", seeded[2].id),
            &json!({"full_name": "Replaced", "email": "r@example.com", "age": 21}),
            ReadConfig::default(),
        )
        .await
        .unwrap();
    assert_eq!(affected, 1);

    let replaced = users
        .find_one(Some(eq("id", seeded[2].id)), ReadConfig::default(), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(replaced.full_name, "Replaced");
    assert_eq!(replaced.age, 21);
}

#[tokio::test]
async fn test_operations_wait_for_connect() {
    let store = MemoryBackend::new();
    let db = Arc::new(Database::with_connector(Arc::new(MemoryConnector::new(store))));
    let users = db.create_service::<User>("users", auto_increment()).unwrap();

    let pending = {
        let users = users.clone();
        tokio::spawn(async move { users.count(None, ReadConfig::default()).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(!pending.is_finished());

    db.connect().await.unwrap();
    assert_eq!(pending.await.unwrap().unwrap(), 0);
}
