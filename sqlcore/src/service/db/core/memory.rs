//! 인메모리 백엔드
//!
//! MySQL 없이 테이블 서비스를 구동하기 위한 저장소입니다. 테이블은 스키마 없이
//! 첫 쓰기에서 생기고, 필터는 SQL과 같은 3값 논리(NULL은 unknown)로 평가됩니다.
//!
//! 복제 흉내: `replica()`는 같은 저장소를 읽는 읽기 전용 핸들을 만들고,
//! `pause_replication()` 동안에는 멈춘 시점의 스냅샷을 읽고 보고합니다.

use crate::service::db::core::connection::{Connector, DatabaseEvent};
use crate::service::db::core::executor::{
    Backend, QueryExecutor, SelectQuery, TransactionExecutor,
};
use crate::service::db::core::filter::{in_array, validate_identifier, CompareOp, Filter};
use crate::service::db::core::types::{
    ConnectionStats, Document, InsertOutcome, ReplicationRole, SortOrder, ID_COLUMN,
};
use crate::tool::current_time::parse_timestamp;
use crate::tool::error::{DbError, DbResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, OwnedRwLockWriteGuard, RwLock};
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct Table {
    rows: Vec<Document>,
    next_id: u64,
}

#[derive(Debug, Clone, Default)]
struct StoreData {
    tables: HashMap<String, Table>,
    /// Bumped once per committed write statement
    binlog_position: u64,
}

#[derive(Default)]
struct MemoryState {
    data: Mutex<StoreData>,
    /// Replica view while replication is paused
    frozen: Mutex<Option<StoreData>>,
    /// Shared by every write; `hold_writes` takes it exclusively
    write_latch: Arc<RwLock<()>>,
    total_queries: AtomicU64,
}

/// Shared in-memory store; clones see the same data
#[derive(Clone)]
pub struct MemoryBackend {
    state: Arc<MemoryState>,
    replica: bool,
    deny_status: Arc<AtomicBool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MemoryState::default()),
            replica: false,
            deny_status: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Read-only view of the same store acting as a replication slave
    pub fn replica(&self) -> Self {
        Self {
            state: self.state.clone(),
            replica: true,
            deny_status: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_replica(&self) -> bool {
        self.replica
    }

    /// Replica reads and its reported position stop at the current state.
    pub fn pause_replication(&self) {
        let snapshot = self.state.data.lock().clone();
        *self.state.frozen.lock() = Some(snapshot);
    }

    pub fn resume_replication(&self) {
        *self.state.frozen.lock() = None;
    }

    /// Makes replication status queries on this handle fail like a missing privilege.
    pub fn deny_replication_status(&self, deny: bool) {
        self.deny_status.store(deny, AtomicOrdering::SeqCst);
    }

    /// Writes and commits on every handle wait until the returned guard is dropped.
    /// Reads keep running.
    pub async fn hold_writes(&self) -> OwnedRwLockWriteGuard<()> {
        self.state.write_latch.clone().write_owned().await
    }

    /// Raw table contents as this handle sees them, soft-deleted rows included
    pub fn dump(&self, table: &str) -> Vec<Document> {
        let rows = |data: &StoreData| {
            data.tables
                .get(table)
                .map(|t| t.rows.clone())
                .unwrap_or_default()
        };
        if self.replica {
            if let Some(frozen) = self.state.frozen.lock().as_ref() {
                return rows(frozen);
            }
        }
        rows(&self.state.data.lock())
    }

    fn record_query(&self) {
        self.state.total_queries.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Runs a read against the view this handle is allowed to see.
    fn read<R>(&self, f: impl FnOnce(&StoreData) -> R) -> R {
        self.record_query();
        if self.replica {
            if let Some(frozen) = self.state.frozen.lock().as_ref() {
                return f(frozen);
            }
        }
        f(&self.state.data.lock())
    }

    fn write<R>(&self, f: impl FnOnce(&mut StoreData) -> DbResult<(R, bool)>) -> DbResult<R> {
        self.record_query();
        self.ensure_writable()?;
        let mut data = self.state.data.lock();
        let (result, changed) = f(&mut data)?;
        if changed {
            data.binlog_position += 1;
        }
        Ok(result)
    }

    fn ensure_writable(&self) -> DbResult<()> {
        if self.replica {
            Err(DbError::Query(
                "The MySQL server is running with the --read-only option".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    /// Reserves the next auto-increment id of `table` in the live store
    fn allocate_id(&self, table: &str) -> u64 {
        let mut data = self.state.data.lock();
        let table = data.tables.entry(table.to_string()).or_default();
        table.next_id += 1;
        table.next_id
    }

    fn position(&self, role: ReplicationRole) -> DbResult<Option<u64>> {
        self.record_query();
        if self.deny_status.load(AtomicOrdering::SeqCst) {
            return Err(DbError::Query(
                "Access denied; you need (at least one of) the SUPER, REPLICATION CLIENT privilege(s) for this operation"
                    .to_string(),
            ));
        }
        match (role, self.replica) {
            (ReplicationRole::Master, false) => Ok(Some(self.state.data.lock().binlog_position)),
            (ReplicationRole::Slave, true) => {
                if let Some(frozen) = self.state.frozen.lock().as_ref() {
                    return Ok(Some(frozen.binlog_position));
                }
                Ok(Some(self.state.data.lock().binlog_position))
            }
            // status of the other role is empty on this server
            _ => Ok(None),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryExecutor for MemoryBackend {
    async fn select(&self, query: &SelectQuery) -> DbResult<Vec<Document>> {
        query.validate()?;
        Ok(self.read(|data| select_rows(data, query)))
    }

    async fn count(&self, table: &str, filter: Option<&Filter>) -> DbResult<u64> {
        validate_table_and_filter(table, filter)?;
        Ok(self.read(|data| count_rows(data, table, filter)))
    }

    async fn distinct(
        &self,
        table: &str,
        column: &str,
        filter: Option<&Filter>,
    ) -> DbResult<Vec<Value>> {
        validate_table_and_filter(table, filter)?;
        validate_identifier(column)?;
        Ok(self.read(|data| distinct_values(data, table, column, filter)))
    }

    async fn insert(&self, table: &str, row: &Document) -> DbResult<InsertOutcome> {
        validate_identifier(table)?;
        let _latch = self.state.write_latch.read().await;
        self.write(|data| insert_row(data, table, row).map(|outcome| (outcome, true)))
    }

    async fn update(
        &self,
        table: &str,
        filter: Option<&Filter>,
        set: &Document,
        limit: Option<u64>,
    ) -> DbResult<u64> {
        validate_table_and_filter(table, filter)?;
        let _latch = self.state.write_latch.read().await;
        self.write(|data| {
            let affected = update_rows(data, table, filter, set, limit);
            Ok((affected, affected > 0))
        })
    }

    async fn delete(
        &self,
        table: &str,
        filter: Option<&Filter>,
        limit: Option<u64>,
    ) -> DbResult<u64> {
        validate_table_and_filter(table, filter)?;
        let _latch = self.state.write_latch.read().await;
        self.write(|data| {
            let affected = delete_rows(data, table, filter, limit);
            Ok((affected, affected > 0))
        })
    }

    async fn execute_raw(&self, sql: &str) -> DbResult<u64> {
        self.record_query();
        raw_statement(sql)
    }

    async fn ping(&self) -> DbResult<Vec<Document>> {
        self.record_query();
        let mut row = Document::new();
        row.insert("ping".to_string(), Value::from(1));
        Ok(vec![row])
    }

    async fn log_position(&self, role: ReplicationRole) -> DbResult<Option<u64>> {
        self.position(role)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn acquire(&self) -> DbResult<Arc<dyn QueryExecutor>> {
        Ok(Arc::new(self.clone()))
    }

    async fn begin(&self) -> DbResult<Arc<dyn TransactionExecutor>> {
        let working = self.state.data.lock().clone();
        debug!("In-memory transaction started");
        Ok(Arc::new(MemoryTransaction {
            backend: self.clone(),
            working: Mutex::new(Some(TxState {
                data: working,
                log: Vec::new(),
            })),
        }))
    }

    async fn close(&self) {}

    fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            active_connections: 0,
            idle_connections: 1,
            total_connections: 1,
            max_connections: 1,
            connection_errors: 0,
            total_queries: self.state.total_queries.load(AtomicOrdering::Relaxed),
        }
    }

    fn into_executor(self: Arc<Self>) -> Arc<dyn QueryExecutor> {
        self
    }
}

struct TxState {
    data: StoreData,
    log: Vec<TxWrite>,
}

/// Row-level effect of one statement, replayed against the live store on commit
enum TxWrite {
    Insert { table: String, row: Document },
    Update { table: String, ids: Vec<Value>, set: Document },
    Delete { table: String, ids: Vec<Value> },
}

impl TxWrite {
    fn apply(&self, data: &mut StoreData) -> DbResult<()> {
        match self {
            TxWrite::Insert { table, row } => insert_row(data, table, row).map(|_| ()),
            TxWrite::Update { table, ids, set } => {
                update_rows(data, table, Some(&in_array(ID_COLUMN, ids.clone())), set, None);
                Ok(())
            }
            TxWrite::Delete { table, ids } => {
                delete_rows(data, table, Some(&in_array(ID_COLUMN, ids.clone())), None);
                Ok(())
            }
        }
    }
}

/// Reads a private snapshot plus its own writes; commit replays the writes on the live store.
///
/// Auto-increment ids are taken from the live store when the row is inserted, so
/// rows written outside the transaction in the meantime never share an id.
pub struct MemoryTransaction {
    backend: MemoryBackend,
    working: Mutex<Option<TxState>>,
}

impl MemoryTransaction {
    fn with_state<R>(&self, f: impl FnOnce(&mut TxState) -> DbResult<R>) -> DbResult<R> {
        self.backend.record_query();
        let mut guard = self.working.lock();
        let state = guard
            .as_mut()
            .ok_or_else(|| DbError::Transaction("transaction already finished".to_string()))?;
        f(state)
    }

    fn take(&self) -> DbResult<TxState> {
        self.working
            .lock()
            .take()
            .ok_or_else(|| DbError::Transaction("transaction already finished".to_string()))
    }
}

#[async_trait]
impl QueryExecutor for MemoryTransaction {
    async fn select(&self, query: &SelectQuery) -> DbResult<Vec<Document>> {
        query.validate()?;
        self.with_state(|state| Ok(select_rows(&state.data, query)))
    }

    async fn count(&self, table: &str, filter: Option<&Filter>) -> DbResult<u64> {
        validate_table_and_filter(table, filter)?;
        self.with_state(|state| Ok(count_rows(&state.data, table, filter)))
    }

    async fn distinct(
        &self,
        table: &str,
        column: &str,
        filter: Option<&Filter>,
    ) -> DbResult<Vec<Value>> {
        validate_table_and_filter(table, filter)?;
        validate_identifier(column)?;
        self.with_state(|state| Ok(distinct_values(&state.data, table, column, filter)))
    }

    async fn insert(&self, table: &str, row: &Document) -> DbResult<InsertOutcome> {
        validate_identifier(table)?;
        self.backend.ensure_writable()?;

        let mut row = row.clone();
        let mut last_insert_id = None;
        if matches!(row.get(ID_COLUMN), None | Some(Value::Null)) {
            let id = self.backend.allocate_id(table);
            row.insert(ID_COLUMN.to_string(), Value::from(id));
            last_insert_id = Some(id);
        }

        self.with_state(|state| {
            insert_row(&mut state.data, table, &row)?;
            state.log.push(TxWrite::Insert {
                table: table.to_string(),
                row,
            });
            Ok(InsertOutcome {
                affected_rows: 1,
                last_insert_id,
            })
        })
    }

    async fn update(
        &self,
        table: &str,
        filter: Option<&Filter>,
        set: &Document,
        limit: Option<u64>,
    ) -> DbResult<u64> {
        validate_table_and_filter(table, filter)?;
        self.backend.ensure_writable()?;
        self.with_state(|state| {
            let ids = matching_ids(&state.data, table, filter, limit);
            if ids.is_empty() || set.is_empty() {
                return Ok(0);
            }
            let by_id = in_array(ID_COLUMN, ids.clone());
            let affected = update_rows(&mut state.data, table, Some(&by_id), set, None);
            state.log.push(TxWrite::Update {
                table: table.to_string(),
                ids,
                set: set.clone(),
            });
            Ok(affected)
        })
    }

    async fn delete(
        &self,
        table: &str,
        filter: Option<&Filter>,
        limit: Option<u64>,
    ) -> DbResult<u64> {
        validate_table_and_filter(table, filter)?;
        self.backend.ensure_writable()?;
        self.with_state(|state| {
            let ids = matching_ids(&state.data, table, filter, limit);
            if ids.is_empty() {
                return Ok(0);
            }
            let by_id = in_array(ID_COLUMN, ids.clone());
            let affected = delete_rows(&mut state.data, table, Some(&by_id), None);
            state.log.push(TxWrite::Delete {
                table: table.to_string(),
                ids,
            });
            Ok(affected)
        })
    }

    async fn execute_raw(&self, sql: &str) -> DbResult<u64> {
        self.with_state(|_| raw_statement(sql))
    }

    async fn ping(&self) -> DbResult<Vec<Document>> {
        self.backend.ping().await
    }

    async fn log_position(&self, role: ReplicationRole) -> DbResult<Option<u64>> {
        self.backend.position(role)
    }
}

#[async_trait]
impl TransactionExecutor for MemoryTransaction {
    async fn commit(&self) -> DbResult<()> {
        let state = self.take()?;
        let _latch = self.backend.state.write_latch.read().await;
        let mut data = self.backend.state.data.lock();

        // all or nothing: replay on a copy, then swap
        let mut next = data.clone();
        for write in &state.log {
            write.apply(&mut next)?;
        }
        next.binlog_position += state.log.len() as u64;
        *data = next;

        debug!("In-memory transaction committed ({} writes)", state.log.len());
        Ok(())
    }

    async fn rollback(&self) -> DbResult<()> {
        self.take()?;
        debug!("In-memory transaction rolled back");
        Ok(())
    }

    fn into_executor(self: Arc<Self>) -> Arc<dyn QueryExecutor> {
        self
    }
}

/// Hands out a `MemoryBackend`, optionally after a delay or with a failure
#[derive(Clone)]
pub struct MemoryConnector {
    backend: MemoryBackend,
    failure: Option<String>,
    delay: Option<Duration>,
}

impl MemoryConnector {
    pub fn new(backend: MemoryBackend) -> Self {
        Self {
            backend,
            failure: None,
            delay: None,
        }
    }

    /// Every connect attempt fails with `reason`
    pub fn fail_with(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        _events: broadcast::Sender<DatabaseEvent>,
    ) -> DbResult<Arc<dyn Backend>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = &self.failure {
            return Err(DbError::Connection(reason.clone()));
        }
        Ok(Arc::new(self.backend.clone()))
    }

    fn describe(&self) -> String {
        if self.backend.replica {
            "memory://replica".to_string()
        } else {
            "memory://primary".to_string()
        }
    }
}

fn validate_table_and_filter(table: &str, filter: Option<&Filter>) -> DbResult<()> {
    validate_identifier(table)?;
    match filter {
        Some(filter) => filter.validate(),
        None => Ok(()),
    }
}

fn raw_statement(sql: &str) -> DbResult<u64> {
    let normalized = sql.trim_start().to_ascii_uppercase();
    if normalized.starts_with("CREATE TABLE") {
        // tables are created on first write
        return Ok(0);
    }
    Err(DbError::Query(format!(
        "raw statements are not supported in memory: {}",
        sql.chars().take(60).collect::<String>()
    )))
}

fn matching_rows<'a>(
    data: &'a StoreData,
    table: &str,
    filter: Option<&'a Filter>,
) -> impl Iterator<Item = &'a Document> + 'a {
    data.tables
        .get(table)
        .into_iter()
        .flat_map(|t| t.rows.iter())
        .filter(move |row| matches(row, filter))
}

fn select_rows(data: &StoreData, query: &SelectQuery) -> Vec<Document> {
    let mut rows: Vec<Document> = matching_rows(data, &query.table, query.filter.as_ref())
        .cloned()
        .collect();

    if let Some(order_by) = &query.order_by {
        rows.sort_by(|a, b| {
            for (column, order) in &order_by.0 {
                let ordering = sort_values(field(a, column), field(b, column));
                let ordering = match order {
                    SortOrder::Asc => ordering,
                    SortOrder::Desc => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
    }

    let offset = query.offset.unwrap_or(0) as usize;
    let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
    rows.into_iter().skip(offset).take(limit).collect()
}

fn count_rows(data: &StoreData, table: &str, filter: Option<&Filter>) -> u64 {
    matching_rows(data, table, filter).count() as u64
}

fn matching_ids(
    data: &StoreData,
    table: &str,
    filter: Option<&Filter>,
    limit: Option<u64>,
) -> Vec<Value> {
    let limit = limit.map(|l| l as usize).unwrap_or(usize::MAX);
    matching_rows(data, table, filter)
        .take(limit)
        .filter_map(|row| row.get(ID_COLUMN).cloned())
        .collect()
}

fn distinct_values(
    data: &StoreData,
    table: &str,
    column: &str,
    filter: Option<&Filter>,
) -> Vec<Value> {
    let mut values: Vec<Value> = Vec::new();
    for row in matching_rows(data, table, filter) {
        let value = field(row, column).clone();
        if !values.contains(&value) {
            values.push(value);
        }
    }
    values
}

fn insert_row(data: &mut StoreData, table: &str, row: &Document) -> DbResult<InsertOutcome> {
    for column in row.keys() {
        validate_identifier(column)?;
    }

    let table = data.tables.entry(table.to_string()).or_default();
    let mut row = row.clone();
    let mut last_insert_id = None;

    match row.get(ID_COLUMN) {
        None | Some(Value::Null) => {
            table.next_id += 1;
            row.insert(ID_COLUMN.to_string(), Value::from(table.next_id));
            last_insert_id = Some(table.next_id);
        }
        Some(id) => {
            if table.rows.iter().any(|existing| existing.get(ID_COLUMN) == Some(id)) {
                return Err(DbError::Query(format!(
                    "Duplicate entry '{}' for key 'PRIMARY'",
                    display_value(id)
                )));
            }
            if let Some(explicit) = id.as_u64() {
                table.next_id = table.next_id.max(explicit);
            }
        }
    }

    table.rows.push(row);
    Ok(InsertOutcome {
        affected_rows: 1,
        last_insert_id,
    })
}

fn update_rows(
    data: &mut StoreData,
    table: &str,
    filter: Option<&Filter>,
    set: &Document,
    limit: Option<u64>,
) -> u64 {
    if set.is_empty() {
        return 0;
    }
    let Some(table) = data.tables.get_mut(table) else {
        return 0;
    };

    let limit = limit.unwrap_or(u64::MAX);
    let mut affected = 0;
    for row in table.rows.iter_mut() {
        if affected >= limit {
            break;
        }
        if matches(row, filter) {
            for (column, value) in set {
                row.insert(column.clone(), value.clone());
            }
            affected += 1;
        }
    }
    affected
}

fn delete_rows(data: &mut StoreData, table: &str, filter: Option<&Filter>, limit: Option<u64>) -> u64 {
    let Some(table) = data.tables.get_mut(table) else {
        return 0;
    };

    let limit = limit.unwrap_or(u64::MAX);
    let mut affected = 0;
    table.rows.retain(|row| {
        if affected < limit && matches(row, filter) {
            affected += 1;
            false
        } else {
            true
        }
    });
    affected
}

fn field<'a>(row: &'a Document, column: &str) -> &'a Value {
    row.get(column).unwrap_or(&Value::Null)
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn matches(row: &Document, filter: Option<&Filter>) -> bool {
    filter.map_or(true, |f| evaluate(row, f) == Some(true))
}

/// Three-valued evaluation; `None` is SQL UNKNOWN.
fn evaluate(row: &Document, filter: &Filter) -> Option<bool> {
    match filter {
        Filter::Compare { column, op, value } => {
            let current = field(row, column);
            if value.is_null() {
                return match op {
                    CompareOp::Eq => Some(current.is_null()),
                    CompareOp::Ne => Some(!current.is_null()),
                    _ => Some(false),
                };
            }
            let ordering = compare_values(current, value)?;
            Some(match op {
                CompareOp::Eq => ordering == Ordering::Equal,
                CompareOp::Ne => ordering != Ordering::Equal,
                CompareOp::Gt => ordering == Ordering::Greater,
                CompareOp::Gte => ordering != Ordering::Less,
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::Lte => ordering != Ordering::Greater,
            })
        }
        Filter::Like { column, pattern } => {
            let text = match field(row, column) {
                Value::Null => return None,
                other => display_value(other),
            };
            Some(like_regex(pattern).is_some_and(|re| re.is_match(&text)))
        }
        Filter::IsNull(column) => Some(field(row, column).is_null()),
        Filter::IsNotNull(column) => Some(!field(row, column).is_null()),
        Filter::In {
            column,
            values,
            negated,
        } => {
            if values.is_empty() {
                return Some(*negated);
            }
            let current = field(row, column);
            if current.is_null() {
                return None;
            }
            let found = values
                .iter()
                .any(|v| compare_values(current, v) == Some(Ordering::Equal));
            Some(found != *negated)
        }
        Filter::Between {
            column,
            low,
            high,
            negated,
        } => {
            let current = field(row, column);
            let above = compare_values(current, low)? != Ordering::Less;
            let below = compare_values(current, high)? != Ordering::Greater;
            Some((above && below) != *negated)
        }
        Filter::And(items) => {
            let mut unknown = false;
            for item in items {
                match evaluate(row, item) {
                    Some(false) => return Some(false),
                    None => unknown = true,
                    Some(true) => {}
                }
            }
            if unknown {
                None
            } else {
                Some(true)
            }
        }
        Filter::Or(items) => {
            let mut unknown = false;
            for item in items {
                match evaluate(row, item) {
                    Some(true) => return Some(true),
                    None => unknown = true,
                    Some(false) => {}
                }
            }
            if unknown {
                None
            } else {
                Some(false)
            }
        }
        Filter::Not(inner) => evaluate(row, inner).map(|b| !b),
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Number(_)) => compare_values(&Value::from(*x as i64), b),
        (Value::Number(_), Value::Bool(y)) => compare_values(a, &Value::from(*y as i64)),
        (Value::String(x), Value::String(y)) => match (parse_timestamp(x), parse_timestamp(y)) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => Some(x.cmp(y)),
        },
        (Value::Number(x), Value::String(y)) => {
            x.as_f64()?.partial_cmp(&y.trim().parse::<f64>().ok()?)
        }
        (Value::String(x), Value::Number(y)) => {
            x.trim().parse::<f64>().ok()?.partial_cmp(&y.as_f64()?)
        }
        _ => Some(a.to_string().cmp(&b.to_string())),
    }
}

/// ORDER BY ordering: NULL sorts first.
fn sort_values(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}

/// LIKE with the default case-insensitive collation
fn like_regex(pattern: &str) -> Option<Regex> {
    let mut expr = String::from("(?is)^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '%' => expr.push_str(".*"),
            '_' => expr.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    expr.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).ok()
}
