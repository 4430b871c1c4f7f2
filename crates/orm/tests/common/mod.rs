//! Shared test fixtures: an in-process driver that records every statement

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use keel_orm::{
    Connector, DatabaseExecutor, DatabasePool, DatabaseTransaction, DatabaseValue, ExecResult,
    FullConfig, MemoryConfig, OrmResult, Row,
};

/// One statement as the driver saw it
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    /// Host of the pool that ran it, prefixed with `tx:` inside a transaction
    pub target: String,
    pub sql: String,
    pub params: Vec<DatabaseValue>,
}

#[derive(Default)]
pub struct Recorder {
    statements: Mutex<Vec<Recorded>>,
    rows: Mutex<VecDeque<Vec<Row>>>,
    next_id: AtomicI64,
}

impl Recorder {
    pub fn statements(&self) -> Vec<Recorded> {
        self.statements.lock().unwrap().clone()
    }

    pub fn sql(&self) -> Vec<String> {
        self.statements().into_iter().map(|s| s.sql).collect()
    }

    pub fn clear(&self) {
        self.statements.lock().unwrap().clear();
    }

    /// Queue the result of the next fetch; fetches with nothing queued return no rows
    pub fn push_rows(&self, rows: Vec<Row>) {
        self.rows.lock().unwrap().push_back(rows);
    }

    fn record(&self, target: &str, sql: &str, params: &[DatabaseValue]) {
        self.statements.lock().unwrap().push(Recorded {
            target: target.to_string(),
            sql: sql.to_string(),
            params: params.to_vec(),
        });
    }

    fn next_rows(&self) -> Vec<Row> {
        self.rows.lock().unwrap().pop_front().unwrap_or_default()
    }
}

#[derive(Clone, Default)]
pub struct FakeConnector {
    pub recorder: Arc<Recorder>,
    pub delay: Option<Duration>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            recorder: Arc::new(Recorder::default()),
            delay: Some(delay),
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, config: &FullConfig) -> OrmResult<Arc<dyn DatabasePool>> {
        Ok(Arc::new(FakePool {
            target: config.host.clone(),
            recorder: Arc::clone(&self.recorder),
            delay: self.delay,
        }))
    }
}

struct FakePool {
    target: String,
    recorder: Arc<Recorder>,
    delay: Option<Duration>,
}

#[async_trait]
impl DatabaseExecutor for FakePool {
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<ExecResult> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.recorder.record(&self.target, sql, params);
        Ok(ExecResult {
            rows_affected: 1,
            last_insert_id: Some(self.recorder.next_id.fetch_add(1, Ordering::SeqCst) + 1),
        })
    }

    async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Row>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.recorder.record(&self.target, sql, params);
        Ok(self.recorder.next_rows())
    }
}

#[async_trait]
impl DatabasePool for FakePool {
    async fn begin_transaction(&self) -> OrmResult<Box<dyn DatabaseTransaction>> {
        self.recorder.record(&self.target, "BEGIN", &[]);
        Ok(Box::new(FakeTransaction {
            target: format!("tx:{}", self.target),
            recorder: Arc::clone(&self.recorder),
        }))
    }

    async fn close(&self) -> OrmResult<()> {
        Ok(())
    }
}

struct FakeTransaction {
    target: String,
    recorder: Arc<Recorder>,
}

#[async_trait]
impl DatabaseExecutor for FakeTransaction {
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<ExecResult> {
        self.recorder.record(&self.target, sql, params);
        Ok(ExecResult {
            rows_affected: 1,
            last_insert_id: Some(self.recorder.next_id.fetch_add(1, Ordering::SeqCst) + 1),
        })
    }

    async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Row>> {
        self.recorder.record(&self.target, sql, params);
        Ok(self.recorder.next_rows())
    }
}

#[async_trait]
impl DatabaseTransaction for FakeTransaction {
    async fn commit(self: Box<Self>) -> OrmResult<()> {
        self.recorder.record(&self.target, "COMMIT", &[]);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> OrmResult<()> {
        self.recorder.record(&self.target, "ROLLBACK", &[]);
        Ok(())
    }
}

/// One mysql connection with a writer `w1` and readers `r1`, `r2`
pub fn split_config() -> MemoryConfig {
    MemoryConfig::from_yaml(
        r#"
database:
  default: mysql
  connections:
    mysql:
      driver: mysql
      host: w1
      port: 3306
      database: app
      username: root
      password: secret
      write:
        - host: w1
      read:
        - host: r1
        - host: r2
"#,
    )
    .expect("valid yaml")
}

/// A single postgres connection on host `pg`
pub fn postgres_config() -> MemoryConfig {
    MemoryConfig::from_yaml(
        r#"
database:
  default: postgres
  connections:
    postgres:
      driver: postgres
      host: pg
      database: app
      username: app
"#,
    )
    .expect("valid yaml")
}

/// An in-memory sqlite database
pub fn sqlite_config() -> MemoryConfig {
    MemoryConfig::from_yaml(
        r#"
database:
  default: sqlite
  connections:
    sqlite:
      driver: sqlite
      database: ":memory:"
"#,
    )
    .expect("valid yaml")
}

pub fn row(pairs: &[(&str, DatabaseValue)]) -> Row {
    Row::new(
        pairs.iter().map(|(column, _)| column.to_string()).collect(),
        pairs.iter().map(|(_, value)| value.clone()).collect(),
    )
}
