//! sqlx `Any` backend
//!
//! Serves MySQL, Postgres and SQLite through sqlx's runtime-dispatched driver.
//! SQL Server SQL is generated by the dialect layer but needs a caller-supplied
//! [`Connector`]; sqlx ships no SQL Server driver.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::any::{Any, AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Column, Row as SqlxRow, ValueRef};
use tokio::sync::Mutex;

use super::core::*;
use super::dialect::Dialect;
use crate::config::FullConfig;
use crate::error::{OrmError, OrmResult};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

type AnyQuery<'q> = sqlx::query::Query<'q, Any, AnyArguments<'q>>;

/// Default connector backed by `sqlx::AnyPool`
#[derive(Debug, Default, Clone)]
pub struct SqlxConnector;

impl SqlxConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for SqlxConnector {
    async fn connect(&self, config: &FullConfig) -> OrmResult<Arc<dyn DatabasePool>> {
        if config.driver == Dialect::Sqlserver {
            return Err(OrmError::UnsupportedDriver(
                "sqlserver (no bundled driver, supply a custom Connector)".to_string(),
            ));
        }

        sqlx::any::install_default_drivers();
        let dsn = config.driver.build_dsn(config)?;

        let in_memory = config.driver == Dialect::Sqlite && config.database == ":memory:";
        let mut options = AnyPoolOptions::new().acquire_timeout(ACQUIRE_TIMEOUT);
        if in_memory {
            // every sqlite connection to :memory: is its own database
            options = options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            let pool = &config.pool;
            options = options
                .max_connections(pool.max_open_conns.max(1))
                .min_connections(pool.max_idle_conns.min(pool.max_open_conns))
                .max_lifetime(pool.conn_max_lifetime);
        }

        let pool = options.connect(&dsn).await.map_err(|e| {
            OrmError::Connection(format!(
                "Failed to open {} connection '{}': {}",
                config.driver, config.connection, e
            ))
        })?;

        tracing::info!(
            connection = %config.connection,
            driver = %config.driver,
            "database connection opened"
        );

        Ok(Arc::new(SqlxPool::new(pool)))
    }
}

/// `AnyPool` behind the engine's pool trait
pub struct SqlxPool {
    pool: AnyPool,
}

impl SqlxPool {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DatabaseExecutor for SqlxPool {
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<ExecResult> {
        let result = bind_all(sqlx::query(sql), params)
            .execute(&self.pool)
            .await?;

        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: result.last_insert_id(),
        })
    }

    async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Row>> {
        let rows = bind_all(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(convert_row).collect()
    }
}

#[async_trait]
impl DatabasePool for SqlxPool {
    async fn begin_transaction(&self) -> OrmResult<Box<dyn DatabaseTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| OrmError::Transaction(format!("Failed to begin transaction: {}", e)))?;

        Ok(Box::new(SqlxTransaction {
            tx: Mutex::new(Some(tx)),
        }))
    }

    async fn close(&self) -> OrmResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// An open sqlx transaction; statements are serialized through the mutex
pub struct SqlxTransaction {
    tx: Mutex<Option<sqlx::Transaction<'static, Any>>>,
}

impl SqlxTransaction {
    fn finished() -> OrmError {
        OrmError::Transaction("transaction already finished".to_string())
    }
}

#[async_trait]
impl DatabaseExecutor for SqlxTransaction {
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<ExecResult> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(Self::finished)?;

        let result = bind_all(sqlx::query(sql), params)
            .execute(&mut **tx)
            .await?;

        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: result.last_insert_id(),
        })
    }

    async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Row>> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(Self::finished)?;

        let rows = bind_all(sqlx::query(sql), params)
            .fetch_all(&mut **tx)
            .await?;

        rows.iter().map(convert_row).collect()
    }
}

#[async_trait]
impl DatabaseTransaction for SqlxTransaction {
    async fn commit(self: Box<Self>) -> OrmResult<()> {
        let tx = self.tx.into_inner().ok_or_else(Self::finished)?;
        tx.commit()
            .await
            .map_err(|e| OrmError::Transaction(format!("Failed to commit transaction: {}", e)))
    }

    async fn rollback(self: Box<Self>) -> OrmResult<()> {
        let tx = self.tx.into_inner().ok_or_else(Self::finished)?;
        tx.rollback()
            .await
            .map_err(|e| OrmError::Transaction(format!("Failed to rollback transaction: {}", e)))
    }
}

fn bind_all<'q>(mut query: AnyQuery<'q>, params: &[DatabaseValue]) -> AnyQuery<'q> {
    for param in params {
        query = bind_value(query, param);
    }
    query
}

/// Bind one value. `Any` has no timestamp type, so timestamps travel as RFC 3339 text.
fn bind_value<'q>(query: AnyQuery<'q>, value: &DatabaseValue) -> AnyQuery<'q> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::DateTime(dt) => query.bind(format_timestamp(dt)),
        DatabaseValue::Bytes(b) => query.bind(b.clone()),
    }
}

fn convert_row(row: &AnyRow) -> OrmResult<Row> {
    let columns: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    let values = (0..columns.len())
        .map(|index| decode_column(row, index))
        .collect::<OrmResult<Vec<_>>>()?;

    Ok(Row::new(columns, values))
}

fn decode_column(row: &AnyRow, index: usize) -> OrmResult<DatabaseValue> {
    // typed reads reject NULL under `Any`
    if row.try_get_raw(index)?.is_null() {
        return Ok(DatabaseValue::Null);
    }
    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return Ok(value.map(DatabaseValue::Int64).unwrap_or_default());
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
        return Ok(value.map(DatabaseValue::Float64).unwrap_or_default());
    }
    if let Ok(value) = row.try_get::<Option<bool>, _>(index) {
        return Ok(value.map(DatabaseValue::Bool).unwrap_or_default());
    }
    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        // text columns holding timestamps come back as DateTime
        return Ok(value
            .map(|s| DatabaseValue::from_json(serde_json::Value::String(s)))
            .unwrap_or_default());
    }
    if let Ok(value) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return Ok(value.map(DatabaseValue::Bytes).unwrap_or_default());
    }

    Err(driver_error(format!(
        "unsupported column type at index {}",
        index
    )))
}
