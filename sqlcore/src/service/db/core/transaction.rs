//! Transaction management module
//!
//! Handles database transactions with commit-on-success, rollback-on-error,
//! and transparent rethrow of the caller's error.

use crate::service::db::core::connection::ConnectionManager;
use crate::service::db::core::executor::{
    QueryExecutor, ReadHandle, TransactionExecutor, WriteHandle,
};
use crate::tool::error::DbResult;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Handle to an open transaction
///
/// Cheap to clone; every clone drives the same underlying transaction. Once the
/// transaction is committed or rolled back, further statements fail with
/// `DbError::Transaction`.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<dyn TransactionExecutor>,
    executor: Arc<dyn QueryExecutor>,
}

impl Transaction {
    pub(crate) fn new(inner: Arc<dyn TransactionExecutor>) -> Self {
        let executor = inner.clone().into_executor();
        Self { inner, executor }
    }

    pub async fn commit(&self) -> DbResult<()> {
        self.inner.commit().await
    }

    pub async fn rollback(&self) -> DbResult<()> {
        self.inner.rollback().await
    }

    pub fn as_read(&self) -> ReadHandle {
        ReadHandle::new(self.executor.clone())
    }

    pub fn as_write(&self) -> WriteHandle {
        WriteHandle::new(self.executor.clone())
    }
}

impl Deref for Transaction {
    type Target = dyn QueryExecutor;

    fn deref(&self) -> &Self::Target {
        self.executor.as_ref()
    }
}

/// Commits on `Ok`, rolls back on `Err` and hands the original error back.
pub async fn run_in_transaction<T, F, Fut>(tx: Transaction, operation: F) -> DbResult<T>
where
    F: FnOnce(Transaction) -> Fut,
    Fut: Future<Output = DbResult<T>>,
{
    debug!("Transaction started");

    match operation(tx.clone()).await {
        Ok(value) => {
            tx.commit().await?;
            info!("Transaction committed successfully");
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                error!("Failed to rollback transaction: {}", rollback_err);
            }
            warn!("Transaction rolled back due to error: {}", err);
            Err(err)
        }
    }
}

/// Transaction manager for database operations
pub struct TransactionManager {
    connection: Arc<ConnectionManager>,
}

impl TransactionManager {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self { connection }
    }

    pub async fn begin(&self) -> DbResult<Transaction> {
        let backend = self.connection.backend()?;
        let inner = backend.begin().await?;
        Ok(Transaction::new(inner))
    }

    /// Execute operation within a transaction
    pub async fn with_transaction<T, F, Fut>(&self, operation: F) -> DbResult<T>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let tx = self.begin().await?;
        run_in_transaction(tx, operation).await
    }
}
