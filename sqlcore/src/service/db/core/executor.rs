//! 쿼리 실행 모듈
//!
//! 관계형 저장소에 대한 실행 능력을 trait으로 추상화합니다.
//! 테이블 서비스는 이 trait만 보고 동작하며, MySQL과 인메모리 구현이 이를 제공합니다.

use crate::service::db::core::filter::{validate_identifier, Filter};
use crate::service::db::core::types::{
    ConnectionStats, Document, InsertOutcome, OrderBy, ReplicationRole,
};
use crate::tool::error::DbResult;
use async_trait::async_trait;
use serde_json::Value;
use std::ops::Deref;
use std::sync::Arc;

/// Structured SELECT statement
#[derive(Debug, Clone, Default)]
pub struct SelectQuery {
    pub table: String,
    pub filter: Option<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl SelectQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    pub fn filter(mut self, filter: Option<Filter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn order_by(mut self, order_by: Option<OrderBy>) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Validates every identifier the statement will render.
    pub fn validate(&self) -> DbResult<()> {
        validate_identifier(&self.table)?;
        if let Some(filter) = &self.filter {
            filter.validate()?;
        }
        if let Some(order_by) = &self.order_by {
            for (column, _) in &order_by.0 {
                validate_identifier(column)?;
            }
        }
        Ok(())
    }
}

/// 관계형 실행 능력
///
/// 풀, 체크아웃된 단일 연결, 트랜잭션이 모두 이 trait을 구현합니다.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn select(&self, query: &SelectQuery) -> DbResult<Vec<Document>>;

    async fn count(&self, table: &str, filter: Option<&Filter>) -> DbResult<u64>;

    async fn distinct(
        &self,
        table: &str,
        column: &str,
        filter: Option<&Filter>,
    ) -> DbResult<Vec<Value>>;

    async fn insert(&self, table: &str, row: &Document) -> DbResult<InsertOutcome>;

    async fn update(
        &self,
        table: &str,
        filter: Option<&Filter>,
        set: &Document,
        limit: Option<u64>,
    ) -> DbResult<u64>;

    async fn delete(&self, table: &str, filter: Option<&Filter>, limit: Option<u64>)
        -> DbResult<u64>;

    /// DDL or administrative statement; returns affected rows
    async fn execute_raw(&self, sql: &str) -> DbResult<u64>;

    /// Trivial round trip (`SELECT 1 as ping`)
    async fn ping(&self) -> DbResult<Vec<Document>>;

    /// Binary log position marker, `None` when the server reports no status
    async fn log_position(&self, role: ReplicationRole) -> DbResult<Option<u64>>;
}

/// 연결 풀 수준의 백엔드
#[async_trait]
pub trait Backend: QueryExecutor {
    /// Checks out one dedicated connection
    async fn acquire(&self) -> DbResult<Arc<dyn QueryExecutor>>;

    async fn begin(&self) -> DbResult<Arc<dyn TransactionExecutor>>;

    async fn close(&self);

    fn stats(&self) -> ConnectionStats;

    fn into_executor(self: Arc<Self>) -> Arc<dyn QueryExecutor>;
}

/// 진행 중인 트랜잭션
#[async_trait]
pub trait TransactionExecutor: QueryExecutor {
    async fn commit(&self) -> DbResult<()>;

    async fn rollback(&self) -> DbResult<()>;

    fn into_executor(self: Arc<Self>) -> Arc<dyn QueryExecutor>;
}

/// Read-only view of a pool or connection (slave side of a replication pair)
///
/// Only read operations are exposed, so a slave handle cannot reach a write path.
#[derive(Clone)]
pub struct ReadHandle {
    inner: Arc<dyn QueryExecutor>,
}

impl ReadHandle {
    pub(crate) fn new(inner: Arc<dyn QueryExecutor>) -> Self {
        Self { inner }
    }

    pub async fn select(&self, query: &SelectQuery) -> DbResult<Vec<Document>> {
        self.inner.select(query).await
    }

    pub async fn count(&self, table: &str, filter: Option<&Filter>) -> DbResult<u64> {
        self.inner.count(table, filter).await
    }

    pub async fn distinct(
        &self,
        table: &str,
        column: &str,
        filter: Option<&Filter>,
    ) -> DbResult<Vec<Value>> {
        self.inner.distinct(table, column, filter).await
    }

    pub async fn ping(&self) -> DbResult<Vec<Document>> {
        self.inner.ping().await
    }

    pub async fn log_position(&self, role: ReplicationRole) -> DbResult<Option<u64>> {
        self.inner.log_position(role).await
    }
}

/// Read-write view of a pool, connection, or transaction (master side)
#[derive(Clone)]
pub struct WriteHandle {
    inner: Arc<dyn QueryExecutor>,
}

impl WriteHandle {
    pub(crate) fn new(inner: Arc<dyn QueryExecutor>) -> Self {
        Self { inner }
    }

    /// Same executor, restricted to reads
    pub fn as_read(&self) -> ReadHandle {
        ReadHandle::new(self.inner.clone())
    }
}

impl Deref for WriteHandle {
    type Target = dyn QueryExecutor;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}
