//! Statement logging
//!
//! Every statement the engine runs is reported once through [`QueryLogger::trace`].

use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::config::ConfigProvider;
use crate::error::OrmError;

const DEFAULT_SLOW_THRESHOLD_MS: u64 = 200;

/// Errors that a retrying caller will see again; not worth an error-level line each time
const QUIET_ERRORS: [&str; 2] = ["access denied", "connection refused"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceLevel {
    Error,
    Slow,
    Debug,
}

#[derive(Debug, Clone)]
pub struct QueryLogger {
    slow_threshold: Duration,
}

impl Default for QueryLogger {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_SLOW_THRESHOLD_MS))
    }
}

impl QueryLogger {
    pub fn new(slow_threshold: Duration) -> Self {
        Self { slow_threshold }
    }

    /// Read `database.slow_threshold` (milliseconds)
    pub fn from_config(config: &dyn ConfigProvider) -> Self {
        let ms = config.get_int("database.slow_threshold", DEFAULT_SLOW_THRESHOLD_MS as i64);
        Self::new(Duration::from_millis(ms.max(0) as u64))
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }

    pub fn classify(&self, elapsed: Duration, err: Option<&OrmError>) -> TraceLevel {
        match err {
            Some(err) => {
                let message = err.to_string().to_lowercase();
                if QUIET_ERRORS.iter().any(|quiet| message.contains(quiet)) {
                    TraceLevel::Debug
                } else {
                    TraceLevel::Error
                }
            }
            None if elapsed >= self.slow_threshold => TraceLevel::Slow,
            None => TraceLevel::Debug,
        }
    }

    pub fn trace(&self, start: Instant, sql: &str, rows_affected: u64, err: Option<&OrmError>) {
        let elapsed = start.elapsed();
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;

        match (self.classify(elapsed, err), err) {
            (TraceLevel::Error, Some(err)) => {
                error!(elapsed_ms, rows = rows_affected, sql, "{}", err);
            }
            (TraceLevel::Debug, Some(err)) => {
                debug!(elapsed_ms, rows = rows_affected, sql, "{}", err);
            }
            (TraceLevel::Slow, _) => {
                warn!(
                    elapsed_ms,
                    rows = rows_affected,
                    sql,
                    "SLOW SQL >= {:?}",
                    self.slow_threshold
                );
            }
            _ => debug!(elapsed_ms, rows = rows_affected, sql, "query"),
        }
    }
}
