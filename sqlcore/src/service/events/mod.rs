//! 변경 이벤트 발행 모듈
//!
//! 테이블 서비스는 쓰기가 끝난 뒤 `ChangePublisher`로 변경을 알립니다.
//! - `InMemoryPublisher`: 프로세스 내부 이벤트 버스로 즉시 전달
//! - `Outbox`: 같은 트랜잭션 안에서 `outbox_events` 테이블에 기록

pub mod in_memory;
pub mod outbox;

pub use in_memory::{EventBus, EventHandler, InMemoryEvent, InMemoryPublisher, SubscriptionId};
pub use outbox::{Outbox, OutboxEvent, OUTBOX_TABLE, OUTBOX_TABLE_DDL};

use crate::service::db::core::transaction::Transaction;
use crate::service::db::core::types::{DbChangeData, DbChangeType};
use crate::tool::error::DbResult;
use async_trait::async_trait;

/// 변경 이벤트 발행 능력
#[async_trait]
pub trait ChangePublisher: Send + Sync {
    /// Publishes one change. Transactional sinks write through `transaction` when given.
    async fn publish_db_change(
        &self,
        table: &str,
        change_type: DbChangeType,
        data: DbChangeData,
        transaction: Option<&Transaction>,
    ) -> DbResult<()>;

    /// Publishes a batch of changes of the same kind, in order.
    async fn publish_db_changes(
        &self,
        table: &str,
        change_type: DbChangeType,
        data: Vec<DbChangeData>,
        transaction: Option<&Transaction>,
    ) -> DbResult<()> {
        for item in data {
            self.publish_db_change(table, change_type, item, transaction)
                .await?;
        }
        Ok(())
    }

    /// `true` when publishing must happen inside the write's transaction
    fn is_transactional(&self) -> bool;

    /// Label used in logs and metrics
    fn sink_name(&self) -> &'static str;
}
