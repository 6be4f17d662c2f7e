//! 데이터베이스 서비스 모듈
//!
//! MySQL 데이터 접근 계층입니다. 단일 풀(`Database`)과 마스터/슬레이브 쌍
//! (`ReplicationDatabase`) 위에서 테이블 서비스(`Service`)가 동작합니다.

pub mod base_service;
pub mod core;
pub mod database;
pub mod replication_database;
pub mod validator;

pub use base_service::{Atomic, ChangeSink, ReplicationService, Service, ServiceOptions};
pub use database::{DataSource, Database};
pub use replication_database::{
    ReplicationDatabase, DEFAULT_REPLICATION_WAIT, REPLICATION_POLL_INTERVAL,
};
pub use validator::{serde_schema, validator_fn, RowValidator, SchemaValidator};

pub use self::core::{
    ConnectionManager, Connector, DatabaseEvent, DbServiceConfig, Filter, GateState,
    MemoryBackend, MemoryConnector, MySqlConnector, PoolConfig, QueryConfig, QueryExecutor,
    ReadHandle, ReadyGate, SelectQuery, Transaction, TransactionManager, WriteHandle,
};
