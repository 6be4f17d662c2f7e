//! 데이터베이스 관리자
//!
//! 연결 풀 하나와 준비 게이트를 소유합니다. 서비스들은 모든 작업 전에
//! 게이트를 기다리므로 `connect()` 전에 만들어 두어도 됩니다.

use crate::config::db::DbConfig;
use crate::monitoring::metrics::Metrics;
use crate::service::db::base_service::{Service, ServiceOptions};
use crate::service::db::core::config::DbServiceConfig;
use crate::service::db::core::connection::{
    ConnectionManager, Connector, DatabaseEvent, ReadyGate, EVENT_CHANNEL_CAPACITY,
};
use crate::service::db::core::executor::{ReadHandle, WriteHandle};
use crate::service::db::core::mysql::MySqlConnector;
use crate::service::db::core::transaction::{Transaction, TransactionManager};
use crate::service::db::core::types::{ConnectionStats, Document};
use crate::service::events::{EventBus, Outbox};
use crate::tool::error::{DbError, DbResult};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// What a table service needs from its database
#[async_trait]
pub trait DataSource: Send + Sync + 'static {
    async fn wait_for_connection(&self) -> DbResult<()>;

    /// Handle for plain reads (the slave in a replication pair)
    fn reader(&self) -> DbResult<ReadHandle>;

    /// Master handle; also serves the read half of read-modify-write operations
    fn writer(&self) -> DbResult<WriteHandle>;

    /// Opens a transaction on the master
    async fn begin(&self) -> DbResult<Transaction>;

    fn event_bus(&self) -> Arc<EventBus>;

    fn outbox(&self) -> Arc<Outbox>;
}

/// Single-pool database manager
pub struct Database {
    connection: Arc<ConnectionManager>,
    transactions: TransactionManager,
    gate: Arc<ReadyGate>,
    events: broadcast::Sender<DatabaseEvent>,
    event_bus: Arc<EventBus>,
    outbox: Arc<Outbox>,
}

impl Database {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_config(DbServiceConfig::new(DbConfig::single(url)))
    }

    /// `MYSQL_URL` and pool defaults
    pub fn from_env() -> Self {
        Self::with_config(DbServiceConfig::from_env())
    }

    pub fn with_config(config: DbServiceConfig) -> Self {
        let connector = MySqlConnector::new(
            config.db_config.url,
            config.pool_config,
            config.query_config,
        );
        Self::with_connector(Arc::new(connector))
    }

    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let connection = Arc::new(ConnectionManager::new("master", connector, events.clone()));
        let gate = Arc::new(ReadyGate::new());
        let outbox = Arc::new(Outbox::new(connection.clone(), gate.clone()));

        Self {
            transactions: TransactionManager::new(connection.clone()),
            connection,
            gate,
            events,
            event_bus: Arc::new(EventBus::new()),
            outbox,
        }
    }

    /// Shares an existing bus instead of the one created with the database
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = bus;
        self
    }

    /// Creates the pool and opens the ready gate.
    ///
    /// On failure an `Error` event is emitted, waiters are woken with the error and
    /// the error is returned; a later successful call still opens the gate.
    pub async fn connect(&self) -> DbResult<()> {
        let was_connected = self.connection.is_connected();

        match self.connection.connect().await {
            Ok(()) => {
                self.gate.open();
                if !was_connected {
                    info!("Connected to MySQL database: {}", self.connection.describe());
                    Metrics::set_pool_connected(self.connection.role(), true);
                    let _ = self.events.send(DatabaseEvent::Connected);
                }
                Ok(())
            }
            Err(e) => {
                error!("Failed to connect to MySQL database: {}", e);
                let _ = self.events.send(DatabaseEvent::Error(e.to_string()));
                self.gate.fail(e.to_string());
                Err(match e {
                    DbError::Connection(_) => e,
                    other => DbError::Connection(other.to_string()),
                })
            }
        }
    }

    pub async fn close(&self) {
        if self.connection.close().await {
            info!("Disconnecting from MySQL database.");
            Metrics::set_pool_connected(self.connection.role(), false);
            let _ = self
                .events
                .send(DatabaseEvent::Disconnected("closed by client".to_string()));
        }
    }

    /// Suspends until `connect()` succeeded (or failed). No timeout.
    pub async fn wait_for_connection(&self) -> DbResult<()> {
        self.gate.wait().await
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Pool-level handle
    pub fn get_db(&self) -> DbResult<WriteHandle> {
        self.connection.writer()
    }

    /// One checked-out connection; `NotConnected` before `connect()`
    pub async fn get_connection(&self) -> DbResult<WriteHandle> {
        self.connection.get_connection().await
    }

    /// Runs `operation` in a transaction: commit on `Ok`, rollback and the same error on `Err`.
    pub async fn with_transaction<T, F, Fut>(&self, operation: F) -> DbResult<T>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        self.transactions.with_transaction(operation).await
    }

    /// `SELECT 1 as ping`; `None` (logged) when the round trip fails
    pub async fn ping(&self) -> Option<Vec<Document>> {
        if let Err(e) = self.wait_for_connection().await {
            error!("Database ping failed: {}", e);
            return None;
        }

        let result = match self.connection.writer() {
            Ok(db) => db.ping().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(rows) => Some(rows),
            Err(e) => {
                error!("Database ping failed: {}", e);
                None
            }
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<DatabaseEvent> {
        self.events.subscribe()
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    pub fn outbox(&self) -> Arc<Outbox> {
        self.outbox.clone()
    }

    pub fn stats(&self) -> Option<ConnectionStats> {
        self.connection.stats()
    }

    /// Table service bound to this database
    pub fn create_service<T>(
        self: &Arc<Self>,
        table: &str,
        options: ServiceOptions,
    ) -> DbResult<Service<T>> {
        Service::new(self.clone(), table, options)
    }
}

#[async_trait]
impl DataSource for Database {
    async fn wait_for_connection(&self) -> DbResult<()> {
        Database::wait_for_connection(self).await
    }

    fn reader(&self) -> DbResult<ReadHandle> {
        self.connection.reader()
    }

    fn writer(&self) -> DbResult<WriteHandle> {
        self.connection.writer()
    }

    async fn begin(&self) -> DbResult<Transaction> {
        self.transactions.begin().await
    }

    fn event_bus(&self) -> Arc<EventBus> {
        Database::event_bus(self)
    }

    fn outbox(&self) -> Arc<Outbox> {
        Database::outbox(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::db::core::memory::{MemoryBackend, MemoryConnector};
    use std::time::Duration;

    #[tokio::test]
    async fn test_accessors_before_connect_fail_with_not_connected() {
        let db = Database::with_connector(Arc::new(MemoryConnector::new(MemoryBackend::new())));
        assert!(matches!(db.get_db(), Err(DbError::NotConnected(_))));
        assert!(matches!(db.get_connection().await, Err(DbError::NotConnected(_))));
        assert!(matches!(
            db.with_transaction(|_tx| async { Ok(()) }).await,
            Err(DbError::NotConnected(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_opens_gate_and_emits_connected() {
        let db = Arc::new(Database::with_connector(Arc::new(
            MemoryConnector::new(MemoryBackend::new()).with_delay(Duration::from_millis(20)),
        )));
        let mut events = db.subscribe_events();

        let waiter = {
            let db = db.clone();
            tokio::spawn(async move { db.wait_for_connection().await })
        };

        db.connect().await.unwrap();
        waiter.await.unwrap().unwrap();
        assert_eq!(events.recv().await.unwrap(), DatabaseEvent::Connected);

        // idempotent
        db.connect().await.unwrap();
        assert!(events.try_recv().is_err());

        let ping = db.ping().await.unwrap();
        assert_eq!(ping[0]["ping"], 1);

        db.close().await;
        assert!(matches!(
            events.recv().await.unwrap(),
            DatabaseEvent::Disconnected(_)
        ));
        assert!(matches!(db.get_db(), Err(DbError::NotConnected(_))));
    }

    #[tokio::test]
    async fn test_connect_failure_rejects_waiters() {
        let db = Arc::new(Database::with_connector(Arc::new(
            MemoryConnector::new(MemoryBackend::new()).fail_with("ECONNREFUSED"),
        )));
        let mut events = db.subscribe_events();

        let waiter = {
            let db = db.clone();
            tokio::spawn(async move { db.wait_for_connection().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            db.connect().await,
            Err(DbError::Connection("ECONNREFUSED".to_string()))
        );
        assert!(matches!(waiter.await.unwrap(), Err(DbError::Connection(_))));
        assert_eq!(
            events.recv().await.unwrap(),
            DatabaseEvent::Error("Connection error: ECONNREFUSED".to_string())
        );
        assert!(db.ping().await.is_none());
    }
}
