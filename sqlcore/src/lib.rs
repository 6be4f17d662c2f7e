//! sqlcore - MySQL 데이터 접근 계층
//!
//! 테이블 서비스, 소프트 삭제, 변경 이벤트(인메모리 버스 / 아웃박스),
//! 준비 게이트를 가진 데이터베이스 관리자, 마스터/슬레이브 복제 라우팅을 제공합니다.
//!
//! # 사용 예시
//! ```rust,no_run
//! use std::sync::Arc;
//! use sqlcore::{eq, CreateConfig, Database, ReadConfig, ServiceOptions};
//!
//! # async fn run() -> sqlcore::DbResult<()> {
//! let db = Arc::new(Database::from_env());
//! let users = db.create_service::<serde_json::Value>("users", ServiceOptions::default())?;
//! db.connect().await?;
//!
//! let user = users
//!     .insert_one(&serde_json::json!({"email": "a@example.com"}), CreateConfig::default())
//!     .await?;
//! let found = users
//!     .find_one(Some(eq("email", "a@example.com")), ReadConfig::default(), None)
//!     .await?;
//! assert_eq!(found, Some(user));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod logging;
pub mod monitoring;
pub mod service;
pub mod tool;

pub use config::DbConfig;
pub use service::db::core::filter::{
    and, between, eq, gt, gte, in_array, is_not_null, is_null, like, lt, lte, ne, not,
    not_between, not_in_array, or,
};
pub use service::db::core::types::{
    ConnectionStats, CreateConfig, DbChangeData, DbChangeType, DeleteConfig, FindOptions,
    FindResult, IdStrategy, OrderBy, ReadConfig, SortOrder, UpdateConfig,
};
pub use service::db::{
    serde_schema, validator_fn, Atomic, ChangeSink, DataSource, Database, DatabaseEvent,
    DbServiceConfig, Filter, ReplicationDatabase, ReplicationService, SchemaValidator, Service,
    ServiceOptions, Transaction,
};
pub use service::events::{ChangePublisher, EventBus, InMemoryEvent, Outbox, OutboxEvent};
pub use tool::{DbError, DbResult, Document, WatchedProperty};
