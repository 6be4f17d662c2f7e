//! MySQL 백엔드
//!
//! sqlx `MySqlPool` 위에서 구조화된 문장을 파라미터 바인딩 SQL로 만들어 실행하고,
//! 결과 행을 컬럼 타입에 따라 JSON 문서로 변환합니다.

use crate::config::db::redact_url;
use crate::monitoring::metrics::Metrics;
use crate::service::db::core::config::{PoolConfig, QueryConfig};
use crate::service::db::core::connection::{Connector, DatabaseEvent};
use crate::service::db::core::executor::{
    Backend, QueryExecutor, SelectQuery, TransactionExecutor,
};
use crate::service::db::core::filter::{validate_identifier, CompareOp, Filter};
use crate::service::db::core::types::{
    ConnectionStats, Document, InsertOutcome, ReplicationRole, CREATED_AT_COLUMN,
    DELETED_AT_COLUMN, UPDATED_AT_COLUMN,
};
use crate::tool::current_time::{format_timestamp, parse_timestamp};
use crate::tool::error::{map_sqlx_error, DbError, DbResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::pool::PoolConnection;
use sqlx::{Column, Executor as _, MySql, QueryBuilder, Row, TypeInfo};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, warn};

/// Creates a sqlx pool for one MySQL URL
pub struct MySqlConnector {
    url: String,
    pool_config: PoolConfig,
    query_config: QueryConfig,
}

impl MySqlConnector {
    pub fn new(url: impl Into<String>, pool_config: PoolConfig, query_config: QueryConfig) -> Self {
        Self {
            url: url.into(),
            pool_config,
            query_config,
        }
    }
}

#[async_trait]
impl Connector for MySqlConnector {
    async fn connect(
        &self,
        events: broadcast::Sender<DatabaseEvent>,
    ) -> DbResult<Arc<dyn Backend>> {
        let pool = MySqlPoolOptions::new()
            .min_connections(self.pool_config.min_connections)
            .max_connections(self.pool_config.max_connections)
            .acquire_timeout(self.pool_config.acquire_timeout)
            .idle_timeout(Some(self.pool_config.idle_timeout))
            .max_lifetime(Some(self.pool_config.max_lifetime))
            .connect(&self.url)
            .await
            .map_err(|e| {
                error!("Failed to create MySQL pool for {}: {}", self.describe(), e);
                DbError::Connection(format!("pool creation failed: {e}"))
            })?;

        let shared = Arc::new(Shared {
            pool,
            pool_config: self.pool_config.clone(),
            query_config: self.query_config.clone(),
            stats: ConnectionStatistics::default(),
            events,
        });

        Ok(Arc::new(MySqlExecutor {
            shared,
            target: Target::Pool,
        }))
    }

    fn describe(&self) -> String {
        redact_url(&self.url)
    }
}

/// 내부 통계 추적기
#[derive(Default)]
struct ConnectionStatistics {
    total_connections: AtomicU64, // 체크아웃된 연결 수 (누적)
    connection_errors: AtomicU64, // 연결 오류 수
    total_queries: AtomicU64,     // 총 쿼리 수
}

struct Shared {
    pool: MySqlPool,
    pool_config: PoolConfig,
    query_config: QueryConfig,
    stats: ConnectionStatistics,
    events: broadcast::Sender<DatabaseEvent>,
}

enum Target {
    Pool,
    Connection(Mutex<PoolConnection<MySql>>),
    Transaction(Mutex<Option<sqlx::Transaction<'static, MySql>>>),
}

/// Pool, checked-out connection, or transaction over one MySQL pool
pub struct MySqlExecutor {
    shared: Arc<Shared>,
    target: Target,
}

/// Runs `$body` with `$exec` bound to whatever sqlx executor the target wraps.
macro_rules! run_on_target {
    ($self:ident, $context:expr, $exec:ident => $body:expr) => {{
        let result: Result<_, sqlx::Error> = match &$self.target {
            Target::Pool => {
                let $exec = &$self.shared.pool;
                $body
            }
            Target::Connection(conn) => {
                let mut guard = conn.lock().await;
                let $exec = &mut **guard;
                $body
            }
            Target::Transaction(tx) => {
                let mut guard = tx.lock().await;
                let Some(tx) = guard.as_mut() else {
                    return Err(DbError::Transaction(
                        "transaction already finished".to_string(),
                    ));
                };
                let $exec = &mut **tx;
                $body
            }
        };
        result.map_err(|e| $self.fail($context, e))
    }};
}

impl MySqlExecutor {
    fn fail(&self, context: &str, err: sqlx::Error) -> DbError {
        let mapped = map_sqlx_error(err, context);
        Metrics::record_query_error();
        if mapped.is_disconnect() {
            self.shared
                .stats
                .connection_errors
                .fetch_add(1, Ordering::Relaxed);
            let _ = self
                .shared
                .events
                .send(DatabaseEvent::Disconnected(mapped.to_string()));
        }
        mapped
    }

    fn log_query(&self, sql: &str) {
        if self.shared.query_config.enable_query_logging {
            debug!("Executing query: {}", sql);
        }
    }

    fn finish_query(&self, kind: &'static str, sql: &str, start: Instant) {
        self.shared.stats.total_queries.fetch_add(1, Ordering::Relaxed);
        let elapsed = start.elapsed();
        Metrics::observe_query(kind, elapsed);

        let elapsed_ms = elapsed.as_millis() as u64;
        if elapsed_ms > self.shared.query_config.slow_query_threshold_ms {
            warn!(
                "Slow query detected ({} ms): {}",
                elapsed_ms,
                sql.chars().take(200).collect::<String>()
            );
        }
    }

    fn child(&self, target: Target) -> MySqlExecutor {
        MySqlExecutor {
            shared: self.shared.clone(),
            target,
        }
    }

    /// Get connection with retry logic
    async fn acquire_with_retry(&self) -> DbResult<PoolConnection<MySql>> {
        let config = &self.shared.pool_config;
        let max_attempts = if config.enable_retry {
            config.max_retries.max(1)
        } else {
            1
        };
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.shared.pool.acquire().await {
                Ok(conn) => {
                    self.shared
                        .stats
                        .total_connections
                        .fetch_add(1, Ordering::Relaxed);
                    debug!("Connection acquired (attempt {}/{})", attempts, max_attempts);
                    return Ok(conn);
                }
                Err(e) => {
                    self.shared
                        .stats
                        .connection_errors
                        .fetch_add(1, Ordering::Relaxed);

                    if attempts >= max_attempts {
                        error!("Failed to acquire connection after {} attempts: {}", attempts, e);
                        return Err(self.fail("connection acquire", e));
                    }

                    warn!("Connection attempt {} failed, retrying: {}", attempts, e);
                    tokio::time::sleep(config.retry_delay * attempts).await;
                }
            }
        }
    }

    async fn fetch_documents(&self, kind: &'static str, sql: &str) -> DbResult<Vec<Document>> {
        self.log_query(sql);
        let start = Instant::now();
        let rows = run_on_target!(self, kind, exec => exec.fetch_all(sql).await)?;
        self.finish_query(kind, sql, start);
        rows.iter().map(row_to_map).collect()
    }
}

#[async_trait]
impl QueryExecutor for MySqlExecutor {
    async fn select(&self, query: &SelectQuery) -> DbResult<Vec<Document>> {
        query.validate()?;

        let mut builder = QueryBuilder::<MySql>::new("SELECT * FROM ");
        builder.push(quote(&query.table));
        push_where(&mut builder, query.filter.as_ref());

        if let Some(order_by) = query.order_by.as_ref().filter(|o| !o.is_empty()) {
            builder.push(" ORDER BY ");
            for (i, (column, order)) in order_by.0.iter().enumerate() {
                if i > 0 {
                    builder.push(", ");
                }
                builder.push(quote(column)).push(" ").push(order.as_sql());
            }
        }

        match (query.limit, query.offset) {
            (Some(limit), Some(offset)) => {
                builder.push(format!(" LIMIT {limit} OFFSET {offset}"));
            }
            (Some(limit), None) => {
                builder.push(format!(" LIMIT {limit}"));
            }
            (None, Some(offset)) => {
                // MySQL has no bare OFFSET
                builder.push(format!(" LIMIT {} OFFSET {offset}", u64::MAX));
            }
            (None, None) => {}
        }

        let sql = builder.sql().to_string();
        self.log_query(&sql);
        let start = Instant::now();

        let rows = run_on_target!(self, "SELECT", exec => builder.build().fetch_all(exec).await)?;

        self.finish_query("select", &sql, start);
        debug!("Query returned {} rows", rows.len());
        rows.iter().map(row_to_map).collect()
    }

    async fn count(&self, table: &str, filter: Option<&Filter>) -> DbResult<u64> {
        validate_identifier(table)?;
        if let Some(filter) = filter {
            filter.validate()?;
        }

        let mut builder = QueryBuilder::<MySql>::new("SELECT COUNT(*) AS count FROM ");
        builder.push(quote(table));
        push_where(&mut builder, filter);

        let sql = builder.sql().to_string();
        self.log_query(&sql);
        let start = Instant::now();

        let row = run_on_target!(self, "COUNT", exec => builder.build().fetch_one(exec).await)?;
        self.finish_query("count", &sql, start);

        let count: i64 = row
            .try_get(0)
            .map_err(|e| DbError::Query(format!("Failed to read count: {e}")))?;
        Ok(count.max(0) as u64)
    }

    async fn distinct(
        &self,
        table: &str,
        column: &str,
        filter: Option<&Filter>,
    ) -> DbResult<Vec<Value>> {
        validate_identifier(table)?;
        validate_identifier(column)?;
        if let Some(filter) = filter {
            filter.validate()?;
        }

        let mut builder = QueryBuilder::<MySql>::new("SELECT DISTINCT ");
        builder.push(quote(column)).push(" FROM ").push(quote(table));
        push_where(&mut builder, filter);

        let sql = builder.sql().to_string();
        self.log_query(&sql);
        let start = Instant::now();

        let rows = run_on_target!(self, "SELECT DISTINCT", exec => builder.build().fetch_all(exec).await)?;
        self.finish_query("select", &sql, start);

        rows.iter()
            .map(|row| Ok(row_to_map(row)?.remove(column).unwrap_or(Value::Null)))
            .collect()
    }

    async fn insert(&self, table: &str, row: &Document) -> DbResult<InsertOutcome> {
        validate_identifier(table)?;
        for column in row.keys() {
            validate_identifier(column)?;
        }

        let mut builder = QueryBuilder::<MySql>::new("INSERT INTO ");
        builder.push(quote(table)).push(" (");
        let columns: Vec<String> = row.keys().map(|c| quote(c)).collect();
        builder.push(columns.join(", ")).push(") VALUES (");
        for (i, (column, value)) in row.iter().enumerate() {
            if i > 0 {
                builder.push(", ");
            }
            push_value(&mut builder, column, value);
        }
        builder.push(")");

        let sql = builder.sql().to_string();
        self.log_query(&sql);
        let start = Instant::now();

        let result = run_on_target!(self, "INSERT", exec => builder.build().execute(exec).await)?;
        self.finish_query("insert", &sql, start);

        let last_insert_id = result.last_insert_id();
        Ok(InsertOutcome {
            affected_rows: result.rows_affected(),
            last_insert_id: (last_insert_id > 0).then_some(last_insert_id),
        })
    }

    async fn update(
        &self,
        table: &str,
        filter: Option<&Filter>,
        set: &Document,
        limit: Option<u64>,
    ) -> DbResult<u64> {
        validate_identifier(table)?;
        if set.is_empty() {
            return Ok(0);
        }
        for column in set.keys() {
            validate_identifier(column)?;
        }
        if let Some(filter) = filter {
            filter.validate()?;
        }

        let mut builder = QueryBuilder::<MySql>::new("UPDATE ");
        builder.push(quote(table)).push(" SET ");
        for (i, (column, value)) in set.iter().enumerate() {
            if i > 0 {
                builder.push(", ");
            }
            builder.push(quote(column)).push(" = ");
            push_value(&mut builder, column, value);
        }
        push_where(&mut builder, filter);
        if let Some(limit) = limit {
            builder.push(format!(" LIMIT {limit}"));
        }

        let sql = builder.sql().to_string();
        self.log_query(&sql);
        let start = Instant::now();

        let result = run_on_target!(self, "UPDATE", exec => builder.build().execute(exec).await)?;
        self.finish_query("update", &sql, start);
        Ok(result.rows_affected())
    }

    async fn delete(
        &self,
        table: &str,
        filter: Option<&Filter>,
        limit: Option<u64>,
    ) -> DbResult<u64> {
        validate_identifier(table)?;
        if let Some(filter) = filter {
            filter.validate()?;
        }

        let mut builder = QueryBuilder::<MySql>::new("DELETE FROM ");
        builder.push(quote(table));
        push_where(&mut builder, filter);
        if let Some(limit) = limit {
            builder.push(format!(" LIMIT {limit}"));
        }

        let sql = builder.sql().to_string();
        self.log_query(&sql);
        let start = Instant::now();

        let result = run_on_target!(self, "DELETE", exec => builder.build().execute(exec).await)?;
        self.finish_query("delete", &sql, start);
        Ok(result.rows_affected())
    }

    async fn execute_raw(&self, sql: &str) -> DbResult<u64> {
        self.log_query(sql);
        let start = Instant::now();
        let result = run_on_target!(self, "raw statement", exec => exec.execute(sql).await)?;
        self.finish_query("raw", sql, start);
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> DbResult<Vec<Document>> {
        self.fetch_documents("ping", "SELECT 1 as ping").await
    }

    async fn log_position(&self, role: ReplicationRole) -> DbResult<Option<u64>> {
        let (sql, column) = match role {
            ReplicationRole::Master => ("SHOW MASTER STATUS", "Position"),
            ReplicationRole::Slave => ("SHOW SLAVE STATUS", "Exec_Master_Log_Pos"),
        };

        let rows = self.fetch_documents("replication", sql).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get(column))
            .and_then(|value| match value {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.parse().ok(),
                _ => None,
            }))
    }
}

#[async_trait]
impl Backend for MySqlExecutor {
    async fn acquire(&self) -> DbResult<Arc<dyn QueryExecutor>> {
        let conn = self.acquire_with_retry().await?;
        Ok(Arc::new(self.child(Target::Connection(Mutex::new(conn)))))
    }

    async fn begin(&self) -> DbResult<Arc<dyn TransactionExecutor>> {
        let tx = self.shared.pool.begin().await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            self.fail("transaction start", e)
        })?;
        Ok(Arc::new(
            self.child(Target::Transaction(Mutex::new(Some(tx)))),
        ))
    }

    async fn close(&self) {
        self.shared.pool.close().await;
    }

    fn stats(&self) -> ConnectionStats {
        let size = self.shared.pool.size();
        let idle = self.shared.pool.num_idle() as u32;
        ConnectionStats {
            active_connections: size.saturating_sub(idle),
            idle_connections: idle,
            total_connections: self.shared.stats.total_connections.load(Ordering::Relaxed) as u32,
            max_connections: self.shared.pool_config.max_connections,
            connection_errors: self.shared.stats.connection_errors.load(Ordering::Relaxed),
            total_queries: self.shared.stats.total_queries.load(Ordering::Relaxed),
        }
    }

    fn into_executor(self: Arc<Self>) -> Arc<dyn QueryExecutor> {
        self
    }
}

#[async_trait]
impl TransactionExecutor for MySqlExecutor {
    async fn commit(&self) -> DbResult<()> {
        let Target::Transaction(slot) = &self.target else {
            return Err(DbError::Transaction("not a transaction".to_string()));
        };
        let tx = slot
            .lock()
            .await
            .take()
            .ok_or_else(|| DbError::Transaction("transaction already finished".to_string()))?;
        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            self.fail("transaction commit", e)
        })
    }

    async fn rollback(&self) -> DbResult<()> {
        let Target::Transaction(slot) = &self.target else {
            return Err(DbError::Transaction("not a transaction".to_string()));
        };
        let tx = slot
            .lock()
            .await
            .take()
            .ok_or_else(|| DbError::Transaction("transaction already finished".to_string()))?;
        tx.rollback().await.map_err(|e| {
            error!("Failed to rollback transaction: {}", e);
            self.fail("transaction rollback", e)
        })
    }

    fn into_executor(self: Arc<Self>) -> Arc<dyn QueryExecutor> {
        self
    }
}

fn quote(identifier: &str) -> String {
    format!("`{identifier}`")
}

fn push_where(builder: &mut QueryBuilder<'_, MySql>, filter: Option<&Filter>) {
    if let Some(filter) = filter {
        builder.push(" WHERE ");
        push_filter(builder, filter);
    }
}

fn push_filter(builder: &mut QueryBuilder<'_, MySql>, filter: &Filter) {
    match filter {
        Filter::Compare { column, op, value } if value.is_null() => {
            // comparisons against NULL follow IS [NOT] NULL semantics
            match op {
                CompareOp::Eq => builder.push(quote(column)).push(" IS NULL"),
                CompareOp::Ne => builder.push(quote(column)).push(" IS NOT NULL"),
                _ => builder.push("1 = 0"),
            };
        }
        Filter::Compare { column, op, value } => {
            builder.push(quote(column)).push(" ").push(op.as_sql()).push(" ");
            push_value(builder, column, value);
        }
        Filter::Like { column, pattern } => {
            builder.push(quote(column)).push(" LIKE ");
            builder.push_bind(pattern.clone());
        }
        Filter::IsNull(column) => {
            builder.push(quote(column)).push(" IS NULL");
        }
        Filter::IsNotNull(column) => {
            builder.push(quote(column)).push(" IS NOT NULL");
        }
        Filter::In {
            column,
            values,
            negated,
        } => {
            if values.is_empty() {
                builder.push(if *negated { "1 = 1" } else { "1 = 0" });
                return;
            }
            builder
                .push(quote(column))
                .push(if *negated { " NOT IN (" } else { " IN (" });
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    builder.push(", ");
                }
                push_value(builder, column, value);
            }
            builder.push(")");
        }
        Filter::Between {
            column,
            low,
            high,
            negated,
        } => {
            builder
                .push(quote(column))
                .push(if *negated { " NOT BETWEEN " } else { " BETWEEN " });
            push_value(builder, column, low);
            builder.push(" AND ");
            push_value(builder, column, high);
        }
        Filter::And(items) | Filter::Or(items) if items.is_empty() => {
            builder.push(if matches!(filter, Filter::And(_)) {
                "1 = 1"
            } else {
                "1 = 0"
            });
        }
        Filter::And(items) | Filter::Or(items) => {
            let joiner = if matches!(filter, Filter::And(_)) {
                " AND "
            } else {
                " OR "
            };
            builder.push("(");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    builder.push(joiner);
                }
                push_filter(builder, item);
            }
            builder.push(")");
        }
        Filter::Not(inner) => {
            builder.push("NOT (");
            push_filter(builder, inner);
            builder.push(")");
        }
    }
}

/// Binds a JSON value with the closest MySQL type.
///
/// RFC3339 strings are bound as timestamps only for the managed timestamp columns;
/// arrays and objects go as JSON text.
fn push_value(builder: &mut QueryBuilder<'_, MySql>, column: &str, value: &Value) {
    match value {
        Value::Null => {
            builder.push_bind(Option::<String>::None);
        }
        Value::Bool(b) => {
            builder.push_bind(*b);
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                builder.push_bind(i);
            } else if let Some(u) = n.as_u64() {
                builder.push_bind(u);
            } else {
                builder.push_bind(n.as_f64().unwrap_or_default());
            }
        }
        Value::String(s) => match timestamp_param(column, s) {
            Some(timestamp) => {
                builder.push_bind(timestamp);
            }
            None => {
                builder.push_bind(s.clone());
            }
        },
        other => {
            builder.push_bind(other.to_string());
        }
    }
}

/// DATETIME parameter for a timestamp column; other columns keep their text
fn timestamp_param(column: &str, value: &str) -> Option<DateTime<Utc>> {
    match column {
        CREATED_AT_COLUMN | UPDATED_AT_COLUMN | DELETED_AT_COLUMN => parse_timestamp(value),
        _ => None,
    }
}

/// Convert database row to a JSON document
fn row_to_map(row: &MySqlRow) -> DbResult<Document> {
    let mut result = Document::new();

    for column in row.columns() {
        let name = column.name();
        let type_name = column.type_info().name();
        let value = decode_column(row, name, type_name)?;
        result.insert(name.to_string(), value);
    }

    Ok(result)
}

fn decode_column(row: &MySqlRow, name: &str, type_name: &str) -> DbResult<Value> {
    let decode_error =
        |e: sqlx::Error| DbError::Serialization(format!("column `{name}` ({type_name}): {e}"));

    let value = match type_name {
        "BOOLEAN" => row
            .try_get::<Option<bool>, _>(name)
            .map_err(decode_error)?
            .map(Value::Bool),
        t if t.ends_with("UNSIGNED") => row
            .try_get::<Option<u64>, _>(name)
            .map_err(decode_error)?
            .map(Value::from),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => row
            .try_get::<Option<i64>, _>(name)
            .map_err(decode_error)?
            .map(Value::from),
        "FLOAT" | "DOUBLE" => row
            .try_get::<Option<f64>, _>(name)
            .map_err(decode_error)?
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        "TIMESTAMP" | "DATETIME" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(name)
            .map_err(decode_error)?
            .map(|v| Value::String(format_timestamp(&v.and_utc()))),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(name)
            .map_err(decode_error)?
            .map(|v| Value::String(v.to_string())),
        "TIME" => row
            .try_get::<Option<chrono::NaiveTime>, _>(name)
            .map_err(decode_error)?
            .map(|v| Value::String(v.to_string())),
        "JSON" => row
            .try_get::<Option<Value>, _>(name)
            .map_err(decode_error)?,
        "BIT" => row
            .try_get_unchecked::<Option<Vec<u8>>, _>(name)
            .map_err(decode_error)?
            .map(|bytes| Value::from(bit_value(&bytes))),
        // DECIMAL, ENUM, SET and the text types arrive as text; keep it verbatim
        _ => row
            .try_get_unchecked::<Option<String>, _>(name)
            .map_err(decode_error)?
            .map(Value::String),
    };

    Ok(value.unwrap_or(Value::Null))
}

/// BIT(n) payload, most significant byte first
fn bit_value(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0, |acc, b| (acc << 8) | u64::from(*b))
}
