//! 복제 인식 데이터베이스 관리자
//!
//! 마스터/슬레이브 풀을 하나의 준비 게이트 아래 둡니다. 쓰기와 트랜잭션은
//! 마스터로, 일반 읽기는 슬레이브로 갑니다. 슬레이브 핸들은 `ReadHandle`이라
//! 쓰기 경로에 넘길 수 없습니다.

use crate::config::db::DbConfig;
use crate::monitoring::metrics::Metrics;
use crate::service::db::base_service::{ReplicationService, Service, ServiceOptions};
use crate::service::db::core::config::DbServiceConfig;
use crate::service::db::core::connection::{
    ConnectionManager, Connector, DatabaseEvent, ReadyGate, EVENT_CHANNEL_CAPACITY,
};
use crate::service::db::core::executor::{ReadHandle, WriteHandle};
use crate::service::db::core::mysql::MySqlConnector;
use crate::service::db::core::transaction::{Transaction, TransactionManager};
use crate::service::db::core::types::{ConnectionStats, Document, ReplicationRole};
use crate::service::db::database::DataSource;
use crate::service::events::{EventBus, Outbox};
use crate::tool::error::{DbError, DbResult};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Interval between lag checks in `wait_for_replication`
pub const REPLICATION_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default `max_wait` for `wait_for_replication`
pub const DEFAULT_REPLICATION_WAIT: Duration = Duration::from_secs(5);

/// Master/slave database manager
pub struct ReplicationDatabase {
    master: Arc<ConnectionManager>,
    slave: Arc<ConnectionManager>,
    transactions: TransactionManager,
    gate: Arc<ReadyGate>,
    events: broadcast::Sender<DatabaseEvent>,
    event_bus: Arc<EventBus>,
    outbox: Arc<Outbox>,
}

impl ReplicationDatabase {
    pub fn new(master_url: impl Into<String>, slave_url: impl Into<String>) -> Self {
        Self::with_config(DbServiceConfig::new(DbConfig::replication(master_url, slave_url)))
    }

    /// `MYSQL_MASTER_URL` / `MYSQL_SLAVE_URL` and pool defaults
    pub fn from_env() -> Self {
        Self::with_config(DbServiceConfig::from_env())
    }

    pub fn with_config(config: DbServiceConfig) -> Self {
        let master = MySqlConnector::new(
            config.db_config.master_url,
            config.pool_config.clone(),
            config.query_config.clone(),
        );
        let slave = MySqlConnector::new(
            config.db_config.slave_url,
            config.pool_config,
            config.query_config,
        );
        Self::with_connectors(Arc::new(master), Arc::new(slave))
    }

    pub fn with_connectors(master: Arc<dyn Connector>, slave: Arc<dyn Connector>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let master = Arc::new(ConnectionManager::new("master", master, events.clone()));
        let slave = Arc::new(ConnectionManager::new("slave", slave, events.clone()));
        let gate = Arc::new(ReadyGate::new());
        let outbox = Arc::new(Outbox::new(master.clone(), gate.clone()));

        Self {
            transactions: TransactionManager::new(master.clone()),
            master,
            slave,
            gate,
            events,
            event_bus: Arc::new(EventBus::new()),
            outbox,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = bus;
        self
    }

    /// Creates both pools; the gate opens only when both are up.
    pub async fn connect(&self) -> DbResult<()> {
        let was_connected = self.master.is_connected() && self.slave.is_connected();

        let result = tokio::try_join!(self.master.connect(), self.slave.connect());
        match result {
            Ok(_) => {
                self.gate.open();
                if !was_connected {
                    info!("Connected to MySQL master: {}", self.master.describe());
                    info!("Connected to MySQL slave: {}", self.slave.describe());
                    Metrics::set_pool_connected(self.master.role(), true);
                    Metrics::set_pool_connected(self.slave.role(), true);
                    let _ = self.events.send(DatabaseEvent::Connected);
                }
                Ok(())
            }
            Err(e) => {
                error!("Failed to connect to MySQL: {}", e);
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
        let master_closed = self.master.close().await;
        let slave_closed = self.slave.close().await;
        if master_closed || slave_closed {
            Metrics::set_pool_connected(self.master.role(), false);
            Metrics::set_pool_connected(self.slave.role(), false);
            let _ = self
                .events
                .send(DatabaseEvent::Disconnected("closed by client".to_string()));
        }
    }

    pub async fn wait_for_connection(&self) -> DbResult<()> {
        self.gate.wait().await
    }

    pub fn is_connected(&self) -> bool {
        self.master.is_connected() && self.slave.is_connected()
    }

    /// Master pool handle
    pub fn get_db(&self) -> DbResult<WriteHandle> {
        self.get_master_db()
    }

    pub fn get_master_db(&self) -> DbResult<WriteHandle> {
        self.master.writer()
    }

    pub fn get_slave_db(&self) -> DbResult<ReadHandle> {
        self.slave.reader()
    }

    /// One checked-out master connection
    pub async fn get_connection(&self) -> DbResult<WriteHandle> {
        self.get_master_connection().await
    }

    pub async fn get_master_connection(&self) -> DbResult<WriteHandle> {
        self.master.get_connection().await
    }

    pub async fn get_slave_connection(&self) -> DbResult<ReadHandle> {
        self.slave.get_read_connection().await
    }

    /// Transaction on the master: commit on `Ok`, rollback and the same error on `Err`.
    pub async fn with_transaction<T, F, Fut>(&self, operation: F) -> DbResult<T>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        self.transactions.with_transaction(operation).await
    }

    /// Master round trip; `None` (logged) on failure
    pub async fn ping(&self) -> Option<Vec<Document>> {
        if let Err(e) = self.wait_for_connection().await {
            error!("Database ping failed: {}", e);
            return None;
        }

        let result = match self.master.writer() {
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

    /// Absolute difference between the master binlog position and the slave's
    /// executed position; `-1` when either status could not be read.
    pub async fn check_replication_lag(&self) -> i64 {
        let lag = match self.replication_positions().await {
            Ok((master, slave)) => master.abs_diff(slave).min(i64::MAX as u64) as i64,
            Err(e) => {
                error!("Error checking replication lag: {}", e);
                -1
            }
        };
        Metrics::set_replication_lag(lag);
        lag
    }

    async fn replication_positions(&self) -> DbResult<(u64, u64)> {
        let master = self.get_master_connection().await?;
        let slave = self.get_slave_connection().await?;

        let master_pos = master.log_position(ReplicationRole::Master).await?;
        let slave_pos = slave.log_position(ReplicationRole::Slave).await?;

        match (master_pos, slave_pos) {
            (Some(master_pos), Some(slave_pos)) => Ok((master_pos, slave_pos)),
            _ => Err(DbError::Query(
                "Could not get replication status".to_string(),
            )),
        }
    }

    /// Polls the lag every 100 ms until it reaches zero (`true`), the check fails
    /// (`false`) or `max_wait` elapses (`false`).
    pub async fn wait_for_replication(&self, max_wait: Duration) -> bool {
        let deadline = Instant::now() + max_wait;

        while Instant::now() < deadline {
            match self.check_replication_lag().await {
                0 => return true,
                -1 => return false,
                lag => debug!("Replication lag {}; waiting", lag),
            }
            tokio::time::sleep(REPLICATION_POLL_INTERVAL).await;
        }

        warn!("Replication did not catch up within {:?}", max_wait);
        false
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

    pub fn master_stats(&self) -> Option<ConnectionStats> {
        self.master.stats()
    }

    pub fn slave_stats(&self) -> Option<ConnectionStats> {
        self.slave.stats()
    }

    /// Table service reading from the slave and writing to the master
    pub fn create_service<T>(
        self: &Arc<Self>,
        table: &str,
        options: ServiceOptions,
    ) -> DbResult<ReplicationService<T>> {
        Service::new(self.clone(), table, options)
    }
}

#[async_trait]
impl DataSource for ReplicationDatabase {
    async fn wait_for_connection(&self) -> DbResult<()> {
        ReplicationDatabase::wait_for_connection(self).await
    }

    fn reader(&self) -> DbResult<ReadHandle> {
        self.get_slave_db()
    }

    fn writer(&self) -> DbResult<WriteHandle> {
        self.get_master_db()
    }

    async fn begin(&self) -> DbResult<Transaction> {
        self.transactions.begin().await
    }

    fn event_bus(&self) -> Arc<EventBus> {
        ReplicationDatabase::event_bus(self)
    }

    fn outbox(&self) -> Arc<Outbox> {
        ReplicationDatabase::outbox(self)
    }
}
