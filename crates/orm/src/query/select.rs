//! Query Builder SELECT and session flags

use crate::model::ModelSchema;

use super::builder::Query;
use super::types::*;

impl Query {
    /// Restrict the selected (and written) columns. Selecting [`ASSOCIATIONS`]
    /// alone cascades association saves instead.
    pub fn select(&self, columns: &[&str]) -> Query {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        self.derive(|c| c.selects = columns)
    }

    /// Exclude columns from reads and writes
    pub fn omit(&self, columns: &[&str]) -> Query {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        self.derive(|c| c.omits = columns)
    }

    pub fn distinct(&self) -> Query {
        self.derive(|c| c.distinct = true)
    }

    /// Include soft-deleted rows
    pub fn with_trashed(&self) -> Query {
        self.derive(|c| c.with_trashed = true)
    }

    /// Suppress every lifecycle hook for statements issued by this query
    pub fn without_events(&self) -> Query {
        self.derive(|c| c.without_events = true)
    }

    pub fn lock_for_update(&self) -> Query {
        self.derive(|c| c.lock = LockMode::ForUpdate)
    }

    pub fn shared_lock(&self) -> Query {
        self.derive(|c| c.lock = LockMode::Shared)
    }
}

/// Which columns a write may touch, resolved against one model
#[derive(Debug, Clone, Default)]
pub(crate) struct ColumnFilter {
    selects: Vec<String>,
    omits: Vec<String>,
}

impl ColumnFilter {
    pub(crate) fn new(conditions: &Conditions, schema: &ModelSchema) -> Self {
        let resolve = |names: &[String]| -> Vec<String> {
            names
                .iter()
                .filter(|name| name.as_str() != ASSOCIATIONS)
                .map(|name| schema.column(name).unwrap_or(name).to_string())
                .collect()
        };
        Self {
            selects: resolve(&conditions.selects),
            omits: resolve(&conditions.omits),
        }
    }

    /// Select wins over omit; with neither every column is allowed
    pub(crate) fn allows(&self, column: &str) -> bool {
        if !self.selects.is_empty() {
            return self
                .selects
                .iter()
                .any(|selected| selected == column || selected == "*");
        }
        !self.omits.iter().any(|omitted| omitted == column)
    }
}
