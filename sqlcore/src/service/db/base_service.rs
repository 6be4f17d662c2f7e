//! 테이블 서비스
//!
//! 테이블 하나에 대한 CRUD 엔진입니다. 소프트 삭제 필터링, 페이지네이션,
//! 스키마 검증, 타임스탬프 기록, 변경 이벤트 발행을 처리합니다.
//!
//! 쓰기 순서는 호출마다 검증 → 기록 → 발행입니다. 아웃박스로 발행하면 기록과
//! 이벤트 행이 같은 트랜잭션에 들어가고, 인메모리 버스로 발행하면 기록이
//! 끝난 뒤에 이벤트가 나갑니다.

use crate::service::db::core::executor::{ReadHandle, SelectQuery, WriteHandle};
use crate::service::db::core::filter::{eq, in_array, is_null, validate_identifier, Filter};
use crate::service::db::core::transaction::Transaction;
use crate::service::db::core::types::{
    CreateConfig, DbChangeData, DbChangeType, DeleteConfig, Document, FindOptions, FindResult,
    IdStrategy, OrderBy, ReadConfig, SortOrder, UpdateConfig, CREATED_AT_COLUMN,
    DELETED_AT_COLUMN, ID_COLUMN, UPDATED_AT_COLUMN,
};
use crate::service::db::database::{DataSource, Database};
use crate::service::db::replication_database::ReplicationDatabase;
use crate::service::db::validator::{run_validator, SchemaValidator};
use crate::service::events::{ChangePublisher, InMemoryPublisher};
use crate::tool::current_time::CurrentTime;
use crate::tool::data_utils::merge_patch;
use crate::tool::error::{DbError, DbResult};
use crate::tool::get_id::generate_id;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Where a service publishes its change events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChangeSink {
    /// The database's `EventBus`, after the write resolved
    #[default]
    InMemory,
    /// `outbox_events`, inside the write's transaction
    Outbox,
}

/// 테이블별 서비스 설정 (생성 후 변경 불가)
#[derive(Clone)]
pub struct ServiceOptions {
    /// 기본적으로 `deleted_at`이 있는 행을 읽기에서 제외
    pub skip_deleted_rows: bool,

    /// 쓰기 전 행 검증기
    pub schema_validator: Option<SchemaValidator>,

    /// 검증기가 있을 때 기본적으로 검증할지 여부
    pub validate_schema: bool,

    /// 기본적으로 변경 이벤트를 발행할지 여부
    pub publish_events: bool,

    pub add_created_at_field: bool,

    pub add_updated_at_field: bool,

    pub change_sink: ChangeSink,

    pub id_strategy: IdStrategy,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            skip_deleted_rows: true,
            schema_validator: None,
            validate_schema: true,
            publish_events: true,
            add_created_at_field: true,
            add_updated_at_field: true,
            change_sink: ChangeSink::InMemory,
            id_strategy: IdStrategy::Generated,
        }
    }
}

impl ServiceOptions {
    pub fn with_validator(mut self, validator: SchemaValidator) -> Self {
        self.schema_validator = Some(validator);
        self
    }

    pub fn with_id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.id_strategy = strategy;
        self
    }

    pub fn with_change_sink(mut self, sink: ChangeSink) -> Self {
        self.change_sink = sink;
        self
    }

    pub fn without_timestamps(mut self) -> Self {
        self.add_created_at_field = false;
        self.add_updated_at_field = false;
        self
    }
}

/// Table service over any `DataSource`
pub struct Service<T, D: DataSource = Database> {
    db: Arc<D>,
    table: String,
    options: ServiceOptions,
    publisher: Arc<dyn ChangePublisher>,
    _row: PhantomData<fn() -> T>,
}

/// Service reading from the slave and writing to the master
pub type ReplicationService<T> = Service<T, ReplicationDatabase>;

impl<T, D: DataSource> Clone for Service<T, D> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            table: self.table.clone(),
            options: self.options.clone(),
            publisher: self.publisher.clone(),
            _row: PhantomData,
        }
    }
}

impl<T, D: DataSource> Service<T, D> {
    pub fn new(db: Arc<D>, table: &str, options: ServiceOptions) -> DbResult<Self> {
        validate_identifier(table)?;

        let publisher: Arc<dyn ChangePublisher> = match options.change_sink {
            ChangeSink::Outbox => db.outbox(),
            ChangeSink::InMemory => Arc::new(InMemoryPublisher::new(db.event_bus())),
        };

        Ok(Self {
            db,
            table: table.to_string(),
            options,
            publisher,
            _row: PhantomData,
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    pub fn db(&self) -> &Arc<D> {
        &self.db
    }
}

impl<T> Service<T, ReplicationDatabase> {
    /// Waits until the slave caught up with the master; `false` on failure or timeout
    pub async fn wait_for_replication(&self, max_wait: Duration) -> bool {
        self.db.wait_for_replication(max_wait).await
    }
}

impl<T, D> Service<T, D>
where
    T: DeserializeOwned + Send + Sync,
    D: DataSource,
{
    // === 읽기 작업 ===

    pub async fn find_one(
        &self,
        filter: Option<Filter>,
        config: ReadConfig,
        order_by: Option<OrderBy>,
    ) -> DbResult<Option<T>> {
        self.db.wait_for_connection().await?;

        let query = SelectQuery::new(&self.table)
            .filter(self.read_filter(filter, config.skip_deleted_rows))
            .order_by(order_by)
            .limit(1);
        let rows = self.read_handle(&config.transaction)?.select(&query).await?;

        rows.into_iter().next().map(Self::from_doc).transpose()
    }

    /// Rows matching `filter` plus the total count.
    ///
    /// With `per_page`, `page` (1-based, default 1) selects a window and
    /// `pages_count = ceil(count / per_page)`. Without it every row is returned and
    /// `pages_count` is 1, or 0 when nothing matched.
    pub async fn find(
        &self,
        filter: Option<Filter>,
        config: ReadConfig,
        options: FindOptions,
    ) -> DbResult<FindResult<T>> {
        self.db.wait_for_connection().await?;

        let filter = self.read_filter(filter, config.skip_deleted_rows);
        let handle = self.read_handle(&config.transaction)?;
        let mut query = SelectQuery::new(&self.table).filter(filter.clone());

        let window = match (options.page, options.per_page) {
            (None, None) => None,
            (Some(_), None) => {
                return Err(DbError::InvalidInput(
                    "page requires per_page".to_string(),
                ))
            }
            (page, Some(per_page)) => {
                let page = page.unwrap_or(1);
                if page < 1 || per_page < 1 {
                    return Err(DbError::InvalidInput(format!(
                        "page and per_page must be at least 1 (page={page}, per_page={per_page})"
                    )));
                }
                let offset = (page - 1).checked_mul(per_page).ok_or_else(|| {
                    DbError::InvalidInput(format!(
                        "page {page} with per_page {per_page} is out of range"
                    ))
                })?;
                query = query.limit(per_page).offset(offset);
                Some(per_page)
            }
        };
        // a window over an unordered result is not stable between statements
        query = query.order_by(match (&window, options.order_by) {
            (Some(_), None) => Some(self.default_order()),
            (_, order_by) => order_by,
        });

        let count = handle.count(&self.table, filter.as_ref()).await?;
        let rows = handle.select(&query).await?;

        let pages_count = match window {
            Some(per_page) => count.div_ceil(per_page),
            None if count == 0 => 0,
            None => 1,
        };

        Ok(FindResult {
            results: rows
                .into_iter()
                .map(Self::from_doc)
                .collect::<DbResult<Vec<T>>>()?,
            count,
            pages_count,
        })
    }

    pub async fn exists(&self, filter: Option<Filter>, config: ReadConfig) -> DbResult<bool> {
        self.db.wait_for_connection().await?;

        let query = SelectQuery::new(&self.table)
            .filter(self.read_filter(filter, config.skip_deleted_rows))
            .limit(1);
        let rows = self.read_handle(&config.transaction)?.select(&query).await?;
        Ok(!rows.is_empty())
    }

    pub async fn count(&self, filter: Option<Filter>, config: ReadConfig) -> DbResult<u64> {
        self.db.wait_for_connection().await?;

        let filter = self.read_filter(filter, config.skip_deleted_rows);
        self.read_handle(&config.transaction)?
            .count(&self.table, filter.as_ref())
            .await
    }

    /// Alias of `count`
    pub async fn count_documents(&self, filter: Option<Filter>, config: ReadConfig) -> DbResult<u64> {
        self.count(filter, config).await
    }

    /// Distinct values of `column` among matching rows
    pub async fn distinct(
        &self,
        column: &str,
        filter: Option<Filter>,
        config: ReadConfig,
    ) -> DbResult<Vec<Value>> {
        self.db.wait_for_connection().await?;

        let filter = self.read_filter(filter, config.skip_deleted_rows);
        self.read_handle(&config.transaction)?
            .distinct(&self.table, column, filter.as_ref())
            .await
    }

    // === 생성 작업 ===

    /// Inserts one row and returns it as stored.
    ///
    /// The id follows the service's `IdStrategy`, timestamps are stamped when absent,
    /// and a validator rejection fails with `DbError::Validation` before anything is written.
    pub async fn insert_one<P: Serialize>(&self, partial: &P, config: CreateConfig) -> DbResult<T> {
        self.db.wait_for_connection().await?;

        let row = self.prepare_insert(partial, config.validate_schema)?;
        let publish = config.publish_events.unwrap_or(self.options.publish_events);

        self.run_write(
            config.transaction,
            false,
            publish,
            DbChangeType::Create,
            |handle| async move {
                let stored = self.insert_row(&handle, row).await?;
                let data = DbChangeData::new(Value::Object(stored.clone()));
                Ok::<_, DbError>((Self::from_doc(stored)?, vec![data]))
            },
        )
        .await
    }

    /// Inserts every row in one transaction; all rows are validated first.
    pub async fn insert_many<P: Serialize>(
        &self,
        partials: &[P],
        config: CreateConfig,
    ) -> DbResult<Vec<T>> {
        self.db.wait_for_connection().await?;

        let rows = partials
            .iter()
            .map(|partial| self.prepare_insert(partial, config.validate_schema))
            .collect::<DbResult<Vec<Document>>>()?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let publish = config.publish_events.unwrap_or(self.options.publish_events);

        self.run_write(
            config.transaction,
            true,
            publish,
            DbChangeType::Create,
            |handle| async move {
                let mut results = Vec::with_capacity(rows.len());
                let mut changes = Vec::with_capacity(rows.len());
                for row in rows {
                    let stored = self.insert_row(&handle, row).await?;
                    changes.push(DbChangeData::new(Value::Object(stored.clone())));
                    results.push(Self::from_doc(stored)?);
                }
                Ok::<_, DbError>((results, changes))
            },
        )
        .await
    }

    // === 수정 작업 ===

    /// Read-modify-write of the first matching row.
    ///
    /// `update_fn` receives the current row and returns a JSON object patch. Returns
    /// `None` (and publishes nothing) when no row matched.
    ///
    /// The read and the write are separate statements: two concurrent calls on the
    /// same row can both read the same pre-image and the later write wins (lost
    /// update). Use `atomic().update_one` for counters and other read-dependent writes.
    pub async fn update_one<F>(
        &self,
        filter: Filter,
        update_fn: F,
        config: UpdateConfig,
    ) -> DbResult<Option<T>>
    where
        F: Fn(&T) -> Value + Send + Sync,
    {
        self.db.wait_for_connection().await?;

        let publish = config.publish_events.unwrap_or(self.options.publish_events);
        let read_filter = self.read_filter(Some(filter), config.skip_deleted_rows);
        let validate = config.validate_schema;

        self.run_write(
            config.transaction,
            false,
            publish,
            DbChangeType::Update,
            |handle| async move {
                let query = SelectQuery::new(&self.table).filter(read_filter).limit(1);
                let Some(prev) = handle.select(&query).await?.into_iter().next() else {
                    debug!("update_one on {}: no matching row", self.table);
                    return Ok::<_, DbError>((None, Vec::new()));
                };

                let (row, data) = self.apply_update(&handle, prev, &update_fn, validate).await?;
                Ok::<_, DbError>((Some(row), vec![data]))
            },
        )
        .await
    }

    /// `update_one` for every matching row, one event per row.
    ///
    /// Same lost-update caveat as `update_one`.
    pub async fn update_many<F>(
        &self,
        filter: Filter,
        update_fn: F,
        config: UpdateConfig,
    ) -> DbResult<Vec<T>>
    where
        F: Fn(&T) -> Value + Send + Sync,
    {
        self.db.wait_for_connection().await?;

        let publish = config.publish_events.unwrap_or(self.options.publish_events);
        let read_filter = self.read_filter(Some(filter), config.skip_deleted_rows);
        let validate = config.validate_schema;

        // a rejected row must not leave the earlier rows written
        self.run_write(
            config.transaction,
            true,
            publish,
            DbChangeType::Update,
            |handle| async move {
                let query = SelectQuery::new(&self.table).filter(read_filter);
                let rows = handle.select(&query).await?;

                let mut results = Vec::with_capacity(rows.len());
                let mut changes = Vec::with_capacity(rows.len());
                for prev in rows {
                    let (row, data) = self.apply_update(&handle, prev, &update_fn, validate).await?;
                    results.push(row);
                    changes.push(data);
                }
                Ok::<_, DbError>((results, changes))
            },
        )
        .await
    }

    /// Replaces the columns of the first matching row with `replacement` in one statement.
    ///
    /// The replacement is validated when a validator is configured. Publishes nothing;
    /// returns the affected row count.
    pub async fn replace_one<P: Serialize>(
        &self,
        filter: Filter,
        replacement: &P,
        config: ReadConfig,
    ) -> DbResult<u64> {
        let mut set = to_document(replacement)?;
        set.remove(ID_COLUMN);
        if let Some(validator) = self.validator(None) {
            set = run_validator(validator, set)?;
            set.remove(ID_COLUMN);
        }
        self.update_statement(filter, set, config, Some(1)).await
    }

    /// Single-statement updates that skip the read-modify-write cycle
    pub fn atomic(&self) -> Atomic<'_, T, D> {
        Atomic { service: self }
    }

    // === 삭제 작업 ===

    /// Hard-deletes the first matching row and returns it.
    pub async fn delete_one(&self, filter: Filter, config: DeleteConfig) -> DbResult<Option<T>> {
        self.db.wait_for_connection().await?;

        let publish = config.publish_events.unwrap_or(self.options.publish_events);
        let read_filter = self.read_filter(Some(filter), config.skip_deleted_rows);

        self.run_write(
            config.transaction,
            false,
            publish,
            DbChangeType::Delete,
            |handle| async move {
                let query = SelectQuery::new(&self.table).filter(read_filter).limit(1);
                let Some(prev) = handle.select(&query).await?.into_iter().next() else {
                    return Ok::<_, DbError>((None, Vec::new()));
                };

                let id = row_id(&prev)?;
                handle
                    .delete(&self.table, Some(&eq(ID_COLUMN, id)), Some(1))
                    .await?;

                let data = DbChangeData::new(Value::Object(prev.clone()));
                Ok::<_, DbError>((Some(Self::from_doc(prev)?), vec![data]))
            },
        )
        .await
    }

    /// Hard-deletes every matching row and returns them.
    pub async fn delete_many(&self, filter: Filter, config: DeleteConfig) -> DbResult<Vec<T>> {
        self.db.wait_for_connection().await?;

        let publish = config.publish_events.unwrap_or(self.options.publish_events);
        let read_filter = self.read_filter(Some(filter), config.skip_deleted_rows);

        self.run_write(
            config.transaction,
            false,
            publish,
            DbChangeType::Delete,
            |handle| async move {
                let query = SelectQuery::new(&self.table).filter(read_filter);
                let rows = handle.select(&query).await?;
                if rows.is_empty() {
                    return Ok::<_, DbError>((Vec::new(), Vec::new()));
                }

                let ids = rows.iter().map(row_id).collect::<DbResult<Vec<Value>>>()?;
                handle
                    .delete(&self.table, Some(&in_array(ID_COLUMN, ids)), None)
                    .await?;

                let changes = rows
                    .iter()
                    .map(|row| DbChangeData::new(Value::Object(row.clone())))
                    .collect();
                let results = rows
                    .into_iter()
                    .map(Self::from_doc)
                    .collect::<DbResult<Vec<T>>>()?;
                Ok::<_, DbError>((results, changes))
            },
        )
        .await
    }

    /// Stamps `deleted_at` on every matching row and returns the soft-deleted rows.
    ///
    /// Publishes `update` events (post-image with `deleted_at`, pre-image as `prev_doc`).
    /// Rows already soft-deleted are not matched again unless the config opts in.
    pub async fn delete_soft(&self, filter: Filter, config: DeleteConfig) -> DbResult<Vec<T>> {
        self.db.wait_for_connection().await?;

        let publish = config.publish_events.unwrap_or(self.options.publish_events);
        let read_filter = self.read_filter(Some(filter), config.skip_deleted_rows);

        // pre-images, stamp and post-images come from one transaction
        self.run_write(
            config.transaction,
            true,
            publish,
            DbChangeType::Update,
            |handle| async move {
                let query = SelectQuery::new(&self.table).filter(read_filter);
                let rows = handle.select(&query).await?;
                if rows.is_empty() {
                    return Ok::<_, DbError>((Vec::new(), Vec::new()));
                }

                let now = CurrentTime::new().to_value();
                let mut set = Document::new();
                set.insert(DELETED_AT_COLUMN.to_string(), now.clone());
                if self.options.add_updated_at_field {
                    set.insert(UPDATED_AT_COLUMN.to_string(), now);
                }

                let ids = rows.iter().map(row_id).collect::<DbResult<Vec<Value>>>()?;
                let by_id = in_array(ID_COLUMN, ids);
                handle.update(&self.table, Some(&by_id), &set, None).await?;

                let post_images: HashMap<String, Document> = handle
                    .select(&SelectQuery::new(&self.table).filter(Some(by_id)))
                    .await?
                    .into_iter()
                    .filter_map(|row| row.get(ID_COLUMN).map(|id| (id.to_string(), row.clone())))
                    .collect();

                let mut results = Vec::with_capacity(rows.len());
                let mut changes = Vec::with_capacity(rows.len());
                for prev in rows {
                    let post = match prev.get(ID_COLUMN).and_then(|id| post_images.get(&id.to_string())) {
                        Some(post) => post.clone(),
                        None => {
                            let mut merged = prev.clone();
                            merge_patch(&mut merged, &set);
                            merged
                        }
                    };
                    changes.push(DbChangeData::with_prev(
                        Value::Object(post.clone()),
                        Value::Object(prev),
                    ));
                    results.push(Self::from_doc(post)?);
                }
                Ok::<_, DbError>((results, changes))
            },
        )
        .await
    }

    /// Validates `partial` with the service's validator, if any
    pub fn validate_schema<P: Serialize>(&self, partial: &P) -> DbResult<Document> {
        let row = to_document(partial)?;
        match self.validator(None) {
            Some(validator) => run_validator(validator, row),
            None => Ok(row),
        }
    }

    // === 내부 헬퍼 ===

    fn from_doc(doc: Document) -> DbResult<T> {
        Ok(serde_json::from_value(Value::Object(doc))?)
    }

    fn validator(&self, per_call: Option<bool>) -> Option<&SchemaValidator> {
        if per_call.unwrap_or(self.options.validate_schema) {
            self.options.schema_validator.as_ref()
        } else {
            None
        }
    }

    /// Caller filter plus the soft-delete condition when skipping deleted rows
    fn read_filter(&self, filter: Option<Filter>, skip_deleted_rows: Option<bool>) -> Option<Filter> {
        if !skip_deleted_rows.unwrap_or(self.options.skip_deleted_rows) {
            return filter;
        }
        let not_deleted = is_null(DELETED_AT_COLUMN);
        Some(match filter {
            Some(filter) => filter.and_also(Some(not_deleted)),
            None => not_deleted,
        })
    }

    /// Page order when the caller gave none: insertion order of the id strategy
    fn default_order(&self) -> OrderBy {
        match self.options.id_strategy {
            IdStrategy::Generated if self.options.add_created_at_field => {
                OrderBy::asc(CREATED_AT_COLUMN).then(ID_COLUMN, SortOrder::Asc)
            }
            _ => OrderBy::asc(ID_COLUMN),
        }
    }

    fn read_handle(&self, transaction: &Option<Transaction>) -> DbResult<ReadHandle> {
        match transaction {
            Some(tx) => Ok(tx.as_read()),
            None => self.db.reader(),
        }
    }

    fn prepare_insert<P: Serialize>(&self, partial: &P, validate: Option<bool>) -> DbResult<Document> {
        let mut row = to_document(partial)?;

        if matches!(row.get(ID_COLUMN), Some(Value::Null)) {
            row.remove(ID_COLUMN);
        }
        if self.options.id_strategy == IdStrategy::Generated && !row.contains_key(ID_COLUMN) {
            row.insert(ID_COLUMN.to_string(), Value::String(generate_id()));
        }

        let now = CurrentTime::new().to_value();
        if self.options.add_created_at_field && is_missing(&row, CREATED_AT_COLUMN) {
            row.insert(CREATED_AT_COLUMN.to_string(), now.clone());
        }
        if self.options.add_updated_at_field && is_missing(&row, UPDATED_AT_COLUMN) {
            row.insert(UPDATED_AT_COLUMN.to_string(), now);
        }

        match self.validator(validate) {
            Some(validator) => run_validator(validator, row),
            None => Ok(row),
        }
    }

    async fn insert_row(&self, handle: &WriteHandle, row: Document) -> DbResult<Document> {
        let outcome = handle.insert(&self.table, &row).await?;

        let id = match row.get(ID_COLUMN) {
            Some(id) if !id.is_null() => id.clone(),
            _ => outcome.last_insert_id.map(Value::from).ok_or_else(|| {
                DbError::Query(format!("insert into {} did not report an id", self.table))
            })?,
        };

        match self.fetch_by_id(handle, &id).await? {
            Some(stored) => Ok(stored),
            None => {
                let mut stored = row;
                stored.insert(ID_COLUMN.to_string(), id);
                Ok(stored)
            }
        }
    }

    async fn fetch_by_id(&self, handle: &WriteHandle, id: &Value) -> DbResult<Option<Document>> {
        let query = SelectQuery::new(&self.table)
            .filter(Some(eq(ID_COLUMN, id.clone())))
            .limit(1);
        Ok(handle.select(&query).await?.into_iter().next())
    }

    async fn apply_update<F>(
        &self,
        handle: &WriteHandle,
        prev: Document,
        update_fn: &F,
        validate: Option<bool>,
    ) -> DbResult<(T, DbChangeData)>
    where
        F: Fn(&T) -> Value + Send + Sync,
    {
        let current = Self::from_doc(prev.clone())?;
        let mut set = match update_fn(&current) {
            Value::Object(patch) => patch,
            other => {
                return Err(DbError::InvalidInput(format!(
                    "update patch must be a JSON object, got {other}"
                )))
            }
        };
        set.remove(ID_COLUMN);
        if self.options.add_updated_at_field && !set.contains_key(UPDATED_AT_COLUMN) {
            set.insert(UPDATED_AT_COLUMN.to_string(), CurrentTime::new().to_value());
        }

        let mut merged = prev.clone();
        merge_patch(&mut merged, &set);
        if let Some(validator) = self.validator(validate) {
            merged = run_validator(validator, merged)?;
            for (column, value) in set.iter_mut() {
                if let Some(normalized) = merged.get(column) {
                    *value = normalized.clone();
                }
            }
        }

        let id = row_id(&prev)?;
        handle
            .update(&self.table, Some(&eq(ID_COLUMN, id.clone())), &set, Some(1))
            .await?;

        let post = self.fetch_by_id(handle, &id).await?.unwrap_or(merged);
        let data = DbChangeData::with_prev(Value::Object(post.clone()), Value::Object(prev));
        Ok::<_, DbError>((Self::from_doc(post)?, data))
    }

    async fn update_statement(
        &self,
        filter: Filter,
        mut set: Document,
        config: ReadConfig,
        limit: Option<u64>,
    ) -> DbResult<u64> {
        self.db.wait_for_connection().await?;

        set.remove(ID_COLUMN);
        if set.is_empty() {
            return Ok(0);
        }
        if self.options.add_updated_at_field && !set.contains_key(UPDATED_AT_COLUMN) {
            set.insert(UPDATED_AT_COLUMN.to_string(), CurrentTime::new().to_value());
        }

        let filter = self.read_filter(Some(filter), config.skip_deleted_rows);
        let handle = match &config.transaction {
            Some(tx) => tx.as_write(),
            None => self.db.writer()?,
        };
        handle
            .update(&self.table, filter.as_ref(), &set, limit)
            .await
    }

    async fn publish(
        &self,
        change_type: DbChangeType,
        mut changes: Vec<DbChangeData>,
        transaction: Option<&Transaction>,
    ) -> DbResult<()> {
        if changes.len() == 1 {
            let data = changes.remove(0);
            self.publisher
                .publish_db_change(&self.table, change_type, data, transaction)
                .await
        } else {
            self.publisher
                .publish_db_changes(&self.table, change_type, changes, transaction)
                .await
        }
    }

    /// Runs a write and publishes its changes.
    ///
    /// A transaction is opened when `force_transaction` is set or the publisher is
    /// transactional, unless the caller supplied one. Transactional publishers write
    /// inside it; others are called after it finished.
    async fn run_write<R, F, Fut>(
        &self,
        transaction: Option<Transaction>,
        force_transaction: bool,
        publish: bool,
        change_type: DbChangeType,
        operation: F,
    ) -> DbResult<R>
    where
        F: FnOnce(WriteHandle) -> Fut,
        Fut: Future<Output = DbResult<(R, Vec<DbChangeData>)>>,
    {
        let transactional_publish = publish && self.publisher.is_transactional();
        let scope = WriteScope::open(
            self.db.as_ref(),
            transaction,
            force_transaction || transactional_publish,
        )
        .await?;

        let outcome: DbResult<(R, Vec<DbChangeData>)> = async {
            let handle = scope.handle(self.db.as_ref())?;
            let (result, changes) = operation(handle).await?;
            if transactional_publish && !changes.is_empty() {
                self.publish(change_type, changes, scope.transaction()).await?;
                return Ok::<_, DbError>((result, Vec::new()));
            }
            Ok::<_, DbError>((result, changes))
        }
        .await;

        let (result, pending) = scope.finish(outcome).await?;
        if publish && !pending.is_empty() {
            self.publish(change_type, pending, None).await?;
        }
        Ok(result)
    }
}

/// Single-statement partial updates; no pre-image read and no events
pub struct Atomic<'a, T, D: DataSource> {
    service: &'a Service<T, D>,
}

impl<'a, T, D> Atomic<'a, T, D>
where
    T: DeserializeOwned + Send + Sync,
    D: DataSource,
{
    /// `UPDATE ... LIMIT 1`; returns the affected row count
    pub async fn update_one<P: Serialize>(
        &self,
        filter: Filter,
        patch: &P,
        config: ReadConfig,
    ) -> DbResult<u64> {
        let set = to_document(patch)?;
        self.service.update_statement(filter, set, config, Some(1)).await
    }

    pub async fn update_many<P: Serialize>(
        &self,
        filter: Filter,
        patch: &P,
        config: ReadConfig,
    ) -> DbResult<u64> {
        let set = to_document(patch)?;
        self.service.update_statement(filter, set, config, None).await
    }
}

/// Transaction context of one write: the caller's, an owned one, or none
struct WriteScope {
    transaction: Option<Transaction>,
    owned: bool,
}

impl WriteScope {
    async fn open<D: DataSource>(
        db: &D,
        caller: Option<Transaction>,
        needs_transaction: bool,
    ) -> DbResult<Self> {
        match caller {
            Some(tx) => Ok(Self {
                transaction: Some(tx),
                owned: false,
            }),
            None if needs_transaction => Ok(Self {
                transaction: Some(db.begin().await?),
                owned: true,
            }),
            None => Ok(Self {
                transaction: None,
                owned: false,
            }),
        }
    }

    fn handle<D: DataSource>(&self, db: &D) -> DbResult<WriteHandle> {
        match &self.transaction {
            Some(tx) => Ok(tx.as_write()),
            None => db.writer(),
        }
    }

    fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    /// Commits or rolls back an owned transaction; the caller's is left open.
    async fn finish<R>(self, outcome: DbResult<R>) -> DbResult<R> {
        let tx = match self.transaction {
            Some(tx) if self.owned => tx,
            _ => return outcome,
        };

        match outcome {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    error!("Failed to rollback transaction: {}", rollback_err);
                }
                err.log("Write rolled back");
                Err(err)
            }
        }
    }
}

fn to_document<P: Serialize>(value: &P) -> DbResult<Document> {
    match serde_json::to_value(value)? {
        Value::Object(row) => Ok(row),
        other => Err(DbError::InvalidInput(format!(
            "row must serialize to a JSON object, got {other}"
        ))),
    }
}

fn is_missing(row: &Document, column: &str) -> bool {
    row.get(column).map_or(true, Value::is_null)
}

fn row_id(row: &Document) -> DbResult<Value> {
    match row.get(ID_COLUMN) {
        Some(id) if !id.is_null() => Ok(id.clone()),
        _ => Err(DbError::Query(format!("row has no {ID_COLUMN} column"))),
    }
}
