//! Common type definitions for database service
//!
//! Shared types used across database service modules

use crate::service::db::core::transaction::Transaction;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use crate::tool::data_utils::Document;

/// Column carrying the row identifier
pub const ID_COLUMN: &str = "id";
/// Column stamped on insert
pub const CREATED_AT_COLUMN: &str = "created_at";
/// Column stamped on every write
pub const UPDATED_AT_COLUMN: &str = "updated_at";
/// Soft-delete marker column
pub const DELETED_AT_COLUMN: &str = "deleted_at";

/// Kind of change carried by a change event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbChangeType {
    Create,
    Update,
    Delete,
}

impl DbChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbChangeType::Create => "create",
            DbChangeType::Update => "update",
            DbChangeType::Delete => "delete",
        }
    }

    /// Event name suffix: `created`, `updated`, `deleted`
    pub fn past_tense(&self) -> &'static str {
        match self {
            DbChangeType::Create => "created",
            DbChangeType::Update => "updated",
            DbChangeType::Delete => "deleted",
        }
    }
}

impl std::fmt::Display for DbChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a change: post-image and, for updates, the pre-image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbChangeData {
    pub doc: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_doc: Option<Value>,
}

impl DbChangeData {
    pub fn new(doc: Value) -> Self {
        Self { doc, prev_doc: None }
    }

    pub fn with_prev(doc: Value, prev_doc: Value) -> Self {
        Self {
            doc,
            prev_doc: Some(prev_doc),
        }
    }
}

/// Paginated query result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindResult<T> {
    pub results: Vec<T>,
    pub count: u64,
    pub pages_count: u64,
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Ordered list of sort keys
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderBy(pub Vec<(String, SortOrder)>);

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self(vec![(column.into(), SortOrder::Asc)])
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self(vec![(column.into(), SortOrder::Desc)])
    }

    /// Adds a tie-breaker key
    pub fn then(mut self, column: impl Into<String>, order: SortOrder) -> Self {
        self.0.push((column.into(), order));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// How a service produces row identifiers, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdStrategy {
    /// The store assigns the id (AUTO_INCREMENT)
    AutoIncrement,
    /// The service assigns an opaque, roughly time-ordered string id
    #[default]
    Generated,
}

/// Per-call read options
#[derive(Clone, Default)]
pub struct ReadConfig {
    /// Overrides the service's soft-delete default
    pub skip_deleted_rows: Option<bool>,
    /// Read through an open transaction instead of the pool
    pub transaction: Option<Transaction>,
}

impl ReadConfig {
    /// Includes soft-deleted rows
    pub fn with_deleted() -> Self {
        Self {
            skip_deleted_rows: Some(false),
            ..Default::default()
        }
    }

    pub fn in_transaction(mut self, tx: &Transaction) -> Self {
        self.transaction = Some(tx.clone());
        self
    }
}

/// Pagination and ordering for `find`
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// 1-based page number; requires `per_page`
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    pub order_by: Option<OrderBy>,
}

impl FindOptions {
    pub fn page(page: u64, per_page: u64) -> Self {
        Self {
            page: Some(page),
            per_page: Some(per_page),
            order_by: None,
        }
    }

    pub fn order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by = Some(order_by);
        self
    }
}

/// Per-call insert options
#[derive(Clone, Default)]
pub struct CreateConfig {
    pub validate_schema: Option<bool>,
    pub publish_events: Option<bool>,
    pub transaction: Option<Transaction>,
}

impl CreateConfig {
    pub fn in_transaction(mut self, tx: &Transaction) -> Self {
        self.transaction = Some(tx.clone());
        self
    }

    pub fn silent() -> Self {
        Self {
            publish_events: Some(false),
            ..Default::default()
        }
    }
}

/// Per-call update options
#[derive(Clone, Default)]
pub struct UpdateConfig {
    pub skip_deleted_rows: Option<bool>,
    pub validate_schema: Option<bool>,
    pub publish_events: Option<bool>,
    pub transaction: Option<Transaction>,
}

impl UpdateConfig {
    pub fn in_transaction(mut self, tx: &Transaction) -> Self {
        self.transaction = Some(tx.clone());
        self
    }

    pub fn silent() -> Self {
        Self {
            publish_events: Some(false),
            ..Default::default()
        }
    }
}

/// Per-call delete options
#[derive(Clone, Default)]
pub struct DeleteConfig {
    pub skip_deleted_rows: Option<bool>,
    pub publish_events: Option<bool>,
    pub transaction: Option<Transaction>,
}

impl DeleteConfig {
    pub fn in_transaction(mut self, tx: &Transaction) -> Self {
        self.transaction = Some(tx.clone());
        self
    }
}

/// Result of a single-row insert
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InsertOutcome {
    pub affected_rows: u64,
    /// AUTO_INCREMENT value assigned by the store, when any
    pub last_insert_id: Option<u64>,
}

/// Which side of a replication pair a position marker is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationRole {
    Master,
    Slave,
}

/// Connection statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub active_connections: u32,
    pub idle_connections: u32,
    pub total_connections: u32,
    pub max_connections: u32,
    pub connection_errors: u64,
    pub total_queries: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_change_type_names() {
        assert_eq!(DbChangeType::Create.past_tense(), "created");
        assert_eq!(DbChangeType::Delete.to_string(), "delete");
        assert_eq!(serde_json::to_value(DbChangeType::Update).unwrap(), json!("update"));
    }

    #[test]
    fn test_change_data_omits_missing_prev_doc() {
        let data = DbChangeData::new(json!({"id": 1}));
        assert_eq!(serde_json::to_value(&data).unwrap(), json!({"doc": {"id": 1}}));
    }

    #[test]
    fn test_order_by_builder() {
        let order = OrderBy::desc("created_at").then("id", SortOrder::Asc);
        assert_eq!(order.0.len(), 2);
        assert_eq!(order.0[0].1.as_sql(), "DESC");
    }
}
