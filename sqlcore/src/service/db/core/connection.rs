//! 연결 관리 모듈
//!
//! 연결 풀의 생명주기, 준비(ready) 게이트, 연결 이벤트를 처리합니다.

use crate::service::db::core::executor::{Backend, ReadHandle, WriteHandle};
use crate::service::db::core::types::ConnectionStats;
use crate::tool::error::{DbError, DbResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Lifecycle notifications emitted by a database manager
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseEvent {
    Connected,
    Disconnected(String),
    Error(String),
}

/// Capacity of the lifecycle event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum GateState {
    Pending,
    Open,
    Failed(String),
}

/// 준비 게이트
///
/// `Open`은 종착 상태이며 한 번만 전이됩니다. 연결 실패 시 `Failed`로 바뀌어
/// 대기 중인 호출자가 에러와 함께 깨어나고, 이후 재연결에 성공하면 `Open`이 됩니다.
pub struct ReadyGate {
    state: watch::Sender<GateState>,
}

impl ReadyGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(GateState::Pending);
        Self { state }
    }

    /// Returns `true` only for the call that opened the gate.
    pub fn open(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == GateState::Open {
                false
            } else {
                *state = GateState::Open;
                true
            }
        })
    }

    /// Rejects current and future waiters until the next successful open.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        self.state.send_if_modified(|state| match state {
            GateState::Open => false,
            _ => {
                *state = GateState::Failed(reason);
                true
            }
        })
    }

    pub fn state(&self) -> GateState {
        self.state.borrow().clone()
    }

    pub fn is_open(&self) -> bool {
        *self.state.borrow() == GateState::Open
    }

    /// Suspends until the gate opens or fails. No timeout.
    pub async fn wait(&self) -> DbResult<()> {
        let mut rx = self.state.subscribe();
        loop {
            let state = rx.borrow_and_update().clone();
            match state {
                GateState::Open => return Ok(()),
                GateState::Failed(reason) => return Err(DbError::Connection(reason)),
                GateState::Pending => {}
            }
            rx.changed()
                .await
                .map_err(|_| DbError::Connection("ready gate dropped".to_string()))?;
        }
    }
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates the pool behind a `ConnectionManager`
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        events: broadcast::Sender<DatabaseEvent>,
    ) -> DbResult<Arc<dyn Backend>>;

    /// Target description safe for logs (credentials masked)
    fn describe(&self) -> String;
}

/// 데이터베이스 작업을 위한 연결 관리자
///
/// 풀 하나를 배타적으로 소유합니다. 풀이 만들어지기 전의 접근은 `NotConnected`입니다.
pub struct ConnectionManager {
    role: &'static str,
    connector: Arc<dyn Connector>,
    backend: RwLock<Option<Arc<dyn Backend>>>,
    events: broadcast::Sender<DatabaseEvent>,
}

impl ConnectionManager {
    pub fn new(
        role: &'static str,
        connector: Arc<dyn Connector>,
        events: broadcast::Sender<DatabaseEvent>,
    ) -> Self {
        Self {
            role,
            connector,
            backend: RwLock::new(None),
            events,
        }
    }

    pub fn role(&self) -> &'static str {
        self.role
    }

    pub fn describe(&self) -> String {
        self.connector.describe()
    }

    /// Creates the pool unless it already exists.
    pub async fn connect(&self) -> DbResult<()> {
        if self.is_connected() {
            debug!("{} pool already created", self.role);
            return Ok(());
        }

        info!("Connecting {} pool: {}", self.role, self.connector.describe());
        let backend = self.connector.connect(self.events.clone()).await?;

        // a concurrent connect may have won the race; keep the first pool
        let loser = {
            let mut slot = self.backend.write();
            if slot.is_some() {
                Some(backend)
            } else {
                *slot = Some(backend);
                None
            }
        };
        if let Some(extra) = loser {
            warn!("Discarding duplicate {} pool", self.role);
            extra.close().await;
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.backend.read().is_some()
    }

    pub fn backend(&self) -> DbResult<Arc<dyn Backend>> {
        self.backend
            .read()
            .clone()
            .ok_or_else(|| DbError::NotConnected(format!("{} database is not connected", self.role)))
    }

    /// Pool-level read-write handle
    pub fn writer(&self) -> DbResult<WriteHandle> {
        Ok(WriteHandle::new(self.backend()?.into_executor()))
    }

    /// Pool-level read-only handle
    pub fn reader(&self) -> DbResult<ReadHandle> {
        Ok(ReadHandle::new(self.backend()?.into_executor()))
    }

    /// One checked-out connection
    pub async fn get_connection(&self) -> DbResult<WriteHandle> {
        let backend = self.backend()?;
        Ok(WriteHandle::new(backend.acquire().await?))
    }

    pub async fn get_read_connection(&self) -> DbResult<ReadHandle> {
        let backend = self.backend()?;
        Ok(ReadHandle::new(backend.acquire().await?))
    }

    pub fn stats(&self) -> Option<ConnectionStats> {
        self.backend.read().as_ref().map(|backend| backend.stats())
    }

    /// Gracefully close all connections
    pub async fn close(&self) -> bool {
        let backend = self.backend.write().take();
        match backend {
            Some(backend) => {
                info!("Closing {} connection pool", self.role);
                backend.close().await;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_gate_wakes_waiters_on_open() {
        let gate = Arc::new(ReadyGate::new());
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(gate.open());
        assert!(!gate.open());
        assert_eq!(waiter.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_gate_rejects_waiters_on_failure() {
        let gate = Arc::new(ReadyGate::new());
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.fail("refused");
        assert_eq!(
            waiter.await.unwrap(),
            Err(DbError::Connection("refused".to_string()))
        );
    }

    #[tokio::test]
    async fn test_gate_recovers_after_failure_but_open_is_final() {
        let gate = ReadyGate::new();
        gate.fail("first attempt");
        assert!(gate.wait().await.is_err());
        assert!(gate.open());
        assert!(!gate.fail("late failure"));
        assert_eq!(gate.state(), GateState::Open);
        assert!(gate.wait().await.is_ok());
    }
}
