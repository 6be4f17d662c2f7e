//! 아웃박스 이벤트 기록
//!
//! 변경을 `outbox_events` 테이블에 행으로 남깁니다. 트랜잭션이 주어지면 같은
//! 트랜잭션 안에서 기록하므로 변경과 이벤트가 함께 커밋되거나 함께 롤백됩니다.
//! 전달 보장은 at-least-once이며, 소비자는 이 크레이트 밖에 있습니다.

use crate::monitoring::metrics::Metrics;
use crate::service::db::core::connection::{ConnectionManager, ReadyGate};
use crate::service::db::core::executor::{QueryExecutor, SelectQuery};
use crate::service::db::core::transaction::Transaction;
use crate::service::db::core::types::{DbChangeData, DbChangeType, Document, OrderBy};
use crate::service::events::ChangePublisher;
use crate::tool::current_time::CurrentTime;
use crate::tool::error::{DbError, DbResult};
use crate::tool::get_id::generate_id;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub const OUTBOX_TABLE: &str = "outbox_events";

/// MySQL DDL for the outbox table
pub const OUTBOX_TABLE_DDL: &str = r#"CREATE TABLE IF NOT EXISTS outbox_events (
    id VARCHAR(255) NOT NULL PRIMARY KEY,
    table_name VARCHAR(255) NOT NULL,
    type VARCHAR(50) NOT NULL,
    doc JSON NOT NULL,
    prev_doc JSON NULL,
    created_at TIMESTAMP(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6),
    INDEX idx_outbox_events_created_at (created_at)
)"#;

/// 아웃박스 레코드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: String,
    pub table_name: String,
    #[serde(rename = "type")]
    pub change_type: DbChangeType,
    pub doc: Value,
    pub prev_doc: Option<Value>,
    pub created_at: String,
}

impl OutboxEvent {
    fn new(table: &str, change_type: DbChangeType, data: DbChangeData) -> Self {
        Self {
            id: generate_id(),
            table_name: table.to_string(),
            change_type,
            doc: data.doc,
            prev_doc: data.prev_doc,
            created_at: CurrentTime::new().to_rfc3339(),
        }
    }

    fn to_row(&self) -> DbResult<Document> {
        match serde_json::to_value(self)? {
            Value::Object(row) => Ok(row),
            _ => Err(DbError::Serialization(
                "outbox event is not an object".to_string(),
            )),
        }
    }

    fn from_row(row: Document) -> DbResult<Self> {
        let mut row = row;
        // MySQL returns JSON columns as text when the driver reports no JSON type
        for column in ["doc", "prev_doc"] {
            if let Some(Value::String(text)) = row.get(column) {
                if let Ok(parsed) = serde_json::from_str::<Value>(text) {
                    row.insert(column.to_string(), parsed);
                }
            }
        }
        Ok(serde_json::from_value(Value::Object(row))?)
    }
}

/// Transactional change publisher writing to `outbox_events`
pub struct Outbox {
    connection: Arc<ConnectionManager>,
    gate: Arc<ReadyGate>,
}

impl Outbox {
    pub fn new(connection: Arc<ConnectionManager>, gate: Arc<ReadyGate>) -> Self {
        Self { connection, gate }
    }

    /// Creates the outbox table when missing
    pub async fn ensure_table(&self) -> DbResult<()> {
        self.gate.wait().await?;
        self.connection.writer()?.execute_raw(OUTBOX_TABLE_DDL).await?;
        Ok(())
    }

    async fn create_event(
        &self,
        table: &str,
        change_type: DbChangeType,
        data: DbChangeData,
        transaction: Option<&Transaction>,
    ) -> DbResult<OutboxEvent> {
        self.gate.wait().await?;

        let event = OutboxEvent::new(table, change_type, data);
        let row = event.to_row()?;

        match transaction {
            Some(tx) => {
                tx.insert(OUTBOX_TABLE, &row).await?;
            }
            None => {
                self.connection.writer()?.insert(OUTBOX_TABLE, &row).await?;
            }
        }

        Metrics::record_change_event(self.sink_name(), change_type.as_str());
        debug!("published outbox event: {} {}", table, change_type);
        Ok(event)
    }

    /// Recorded events, oldest first
    pub async fn events(&self, table: Option<&str>) -> DbResult<Vec<OutboxEvent>> {
        self.gate.wait().await?;
        let filter = table.map(|t| crate::service::db::core::filter::eq("table_name", t));
        let query = SelectQuery::new(OUTBOX_TABLE)
            .filter(filter)
            .order_by(Some(OrderBy::asc("created_at")));
        let rows = self.connection.writer()?.select(&query).await?;
        rows.into_iter().map(OutboxEvent::from_row).collect()
    }
}

#[async_trait]
impl ChangePublisher for Outbox {
    async fn publish_db_change(
        &self,
        table: &str,
        change_type: DbChangeType,
        data: DbChangeData,
        transaction: Option<&Transaction>,
    ) -> DbResult<()> {
        self.create_event(table, change_type, data, transaction)
            .await
            .map(|_| ())
    }

    fn is_transactional(&self) -> bool {
        true
    }

    fn sink_name(&self) -> &'static str {
        "outbox"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::db::core::connection::EVENT_CHANNEL_CAPACITY;
    use crate::service::db::core::memory::{MemoryBackend, MemoryConnector};
    use crate::service::db::core::transaction::TransactionManager;
    use serde_json::json;
    use tokio::sync::broadcast;

    async fn outbox_over(store: &MemoryBackend) -> (Outbox, Arc<ConnectionManager>, Arc<ReadyGate>) {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let manager = Arc::new(ConnectionManager::new(
            "master",
            Arc::new(MemoryConnector::new(store.clone())),
            events,
        ));
        let gate = Arc::new(ReadyGate::new());
        (Outbox::new(manager.clone(), gate.clone()), manager, gate)
    }

    #[tokio::test]
    async fn test_outbox_waits_for_gate_then_writes() {
        let store = MemoryBackend::new();
        let (outbox, manager, gate) = outbox_over(&store).await;
        let outbox = Arc::new(outbox);

        let pending = {
            let outbox = outbox.clone();
            tokio::spawn(async move {
                outbox
                    .publish_db_change(
                        "users",
                        DbChangeType::Update,
                        DbChangeData::with_prev(json!({"id": 1, "n": 2}), json!({"id": 1, "n": 1})),
                        None,
                    )
                    .await
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(store.dump(OUTBOX_TABLE).is_empty());

        manager.connect().await.unwrap();
        gate.open();
        pending.await.unwrap().unwrap();

        let events = outbox.events(Some("users")).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].change_type, DbChangeType::Update);
        assert_eq!(events[0].prev_doc, Some(json!({"id": 1, "n": 1})));
    }

    #[tokio::test]
    async fn test_outbox_rows_roll_back_with_transaction() {
        let store = MemoryBackend::new();
        let (outbox, manager, gate) = outbox_over(&store).await;
        manager.connect().await.unwrap();
        gate.open();

        let transactions = TransactionManager::new(manager.clone());
        let result: DbResult<()> = transactions
            .with_transaction(|tx| async move {
                outbox
                    .publish_db_change(
                        "users",
                        DbChangeType::Create,
                        DbChangeData::new(json!({"id": 1})),
                        Some(&tx),
                    )
                    .await?;
                Err(DbError::Query("boom".to_string()))
            })
            .await;

        assert_eq!(result, Err(DbError::Query("boom".to_string())));
        assert!(store.dump(OUTBOX_TABLE).is_empty());
    }
}
