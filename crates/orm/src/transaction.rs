//! Transaction Management
//!
//! A transaction pins one writer connection. Queries derived from it carry a
//! shared handle, so every statement they issue (hooks and eager loads
//! included) runs inside the transaction until it is committed or rolled back.

use std::future::Future;
use std::ops::Deref;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::backends::{DatabaseTransaction, DatabaseValue, Dialect, ExecResult, Row};
use crate::connection::Access;
use crate::error::{OrmError, OrmResult};
use crate::query::Query;

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// Convert to SQL string for SET TRANSACTION ISOLATION LEVEL command
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Transaction configuration options
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionConfig {
    pub isolation_level: Option<IsolationLevel>,
    pub read_only: bool,
}

/// Statement that applies `config` as the first statement of a transaction
fn characteristics(dialect: Dialect, config: TransactionConfig) -> OrmResult<Option<String>> {
    if config.isolation_level.is_none() && !config.read_only {
        return Ok(None);
    }
    match dialect {
        Dialect::Postgres => {
            let mut modes = Vec::new();
            if let Some(level) = config.isolation_level {
                modes.push(format!("ISOLATION LEVEL {}", level.as_sql()));
            }
            if config.read_only {
                modes.push("READ ONLY".to_string());
            }
            Ok(Some(format!("SET TRANSACTION {}", modes.join(", "))))
        }
        Dialect::Sqlserver if !config.read_only => Ok(config
            .isolation_level
            .map(|level| format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql()))),
        other => Err(OrmError::Transaction(format!(
            "{} cannot change transaction characteristics after the transaction has started",
            other
        ))),
    }
}

/// The live driver transaction shared by every query bound to it
pub(crate) struct TxHandle {
    inner: Mutex<Option<Box<dyn DatabaseTransaction>>>,
}

impl TxHandle {
    fn new(tx: Box<dyn DatabaseTransaction>) -> Self {
        Self {
            inner: Mutex::new(Some(tx)),
        }
    }

    pub(crate) async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<ExecResult> {
        let guard = self.inner.lock().await;
        match guard.as_ref() {
            Some(tx) => tx.execute(sql, params).await,
            None => Err(finished()),
        }
    }

    pub(crate) async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Row>> {
        let guard = self.inner.lock().await;
        match guard.as_ref() {
            Some(tx) => tx.fetch_all(sql, params).await,
            None => Err(finished()),
        }
    }

    async fn take(&self) -> OrmResult<Box<dyn DatabaseTransaction>> {
        self.inner.lock().await.take().ok_or_else(finished)
    }
}

fn finished() -> OrmError {
    OrmError::Transaction("transaction has already been committed or rolled back".to_string())
}

/// An open transaction. Derefs to a query bound to it.
pub struct Transaction {
    query: Query,
    handle: Arc<TxHandle>,
}

impl Deref for Transaction {
    type Target = Query;

    fn deref(&self) -> &Query {
        &self.query
    }
}

impl Transaction {
    /// A query bound to this transaction, owned so it can move into closures
    pub fn query(&self) -> Query {
        self.query.clone()
    }

    /// Commit the transaction
    pub async fn commit(self) -> OrmResult<()> {
        let tx = self.handle.take().await?;
        tx.commit().await?;
        debug!(connection = %self.query.connection_name(), "transaction committed");
        Ok(())
    }

    /// Rollback the transaction
    pub async fn rollback(self) -> OrmResult<()> {
        let tx = self.handle.take().await?;
        tx.rollback().await?;
        debug!(connection = %self.query.connection_name(), "transaction rolled back");
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if let Ok(guard) = self.handle.inner.try_lock() {
            if guard.is_some() {
                // the driver rolls back once the last bound query is gone
                warn!("Transaction dropped without explicit commit or rollback");
            }
        }
    }
}

impl Query {
    /// Start a transaction on this query's connection
    pub async fn begin(&self) -> OrmResult<Transaction> {
        self.begin_with(TransactionConfig::default()).await
    }

    pub async fn begin_with(&self, config: TransactionConfig) -> OrmResult<Transaction> {
        if self.tx.is_some() {
            return Err(OrmError::Transaction(
                "nested transactions are not supported".to_string(),
            ));
        }
        let setup = characteristics(self.dialect()?, config)?;

        let connection = self.orm.registry.connection(&self.connection).await?;
        let tx = connection.pool(Access::Write).begin_transaction().await?;
        let handle = Arc::new(TxHandle::new(tx));
        debug!(connection = %self.connection, "transaction started");

        let mut query = self.fresh();
        query.tx = Some(Arc::clone(&handle));
        let transaction = Transaction { query, handle };

        if let Some(sql) = setup {
            transaction.exec(&sql, ()).await?;
        }
        Ok(transaction)
    }

    /// Run `work` in a transaction: commit on `Ok`, roll back on `Err` or panic.
    /// A panic is reported as [`OrmError::Transaction`].
    pub async fn transaction<F, Fut, T>(&self, work: F) -> OrmResult<T>
    where
        F: FnOnce(Query) -> Fut,
        Fut: Future<Output = OrmResult<T>>,
    {
        let tx = self.begin().await?;
        let scoped = tx.query();
        let outcome = AssertUnwindSafe(async move { work(scoped).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(value)) => {
                tx.commit().await?;
                Ok(value)
            }
            Ok(Err(err)) => {
                warn!("transaction rolled back: {}", err);
                rollback_quietly(tx).await;
                Err(err)
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!("transaction rolled back after panic: {}", message);
                rollback_quietly(tx).await;
                Err(OrmError::Transaction(format!(
                    "transaction callback panicked: {}",
                    message
                )))
            }
        }
    }
}

async fn rollback_quietly(tx: Transaction) {
    if let Err(e) = tx.rollback().await {
        warn!("rollback failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_level_sql() {
        assert_eq!(IsolationLevel::ReadUncommitted.as_sql(), "READ UNCOMMITTED");
        assert_eq!(IsolationLevel::ReadCommitted.as_sql(), "READ COMMITTED");
        assert_eq!(IsolationLevel::RepeatableRead.as_sql(), "REPEATABLE READ");
        assert_eq!(IsolationLevel::Serializable.as_sql(), "SERIALIZABLE");
    }

    #[test]
    fn test_default_config_needs_no_setup() {
        for dialect in [Dialect::Mysql, Dialect::Postgres, Dialect::Sqlite, Dialect::Sqlserver] {
            assert_eq!(characteristics(dialect, TransactionConfig::default()).unwrap(), None);
        }
    }

    #[test]
    fn test_postgres_characteristics() {
        let config = TransactionConfig {
            isolation_level: Some(IsolationLevel::Serializable),
            read_only: true,
        };
        assert_eq!(
            characteristics(Dialect::Postgres, config).unwrap().as_deref(),
            Some("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE, READ ONLY")
        );
    }

    #[test]
    fn test_unsupported_characteristics_are_rejected() {
        let config = TransactionConfig {
            isolation_level: Some(IsolationLevel::RepeatableRead),
            read_only: false,
        };
        assert!(characteristics(Dialect::Sqlite, config).is_err());
        assert!(characteristics(Dialect::Mysql, config).is_err());
        assert!(characteristics(Dialect::Sqlserver, config).unwrap().is_some());
    }
}
