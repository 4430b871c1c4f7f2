//! Query Builder Types - the accumulated, immutable query state

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::backends::DatabaseValue;

use super::Query;

/// Selecting this token cascades association writes; omitting it (the default) skips them
pub const ASSOCIATIONS: &str = "relationships";

/// Operators `where_` recognizes as a leading argument
pub(crate) const OPERATORS: [&str; 5] = [">", ">=", "=", "<=", "<"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    #[default]
    None,
    ForUpdate,
    Shared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderDirection::Asc => write!(f, "ASC"),
            OrderDirection::Desc => write!(f, "DESC"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::Inner => write!(f, "INNER JOIN"),
            JoinType::Left => write!(f, "LEFT JOIN"),
            JoinType::Right => write!(f, "RIGHT JOIN"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Join {
    On {
        join_type: JoinType,
        table: String,
        left: String,
        right: String,
    },
    Raw {
        sql: String,
        args: Vec<DatabaseValue>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Order {
    Column {
        column: String,
        direction: OrderDirection,
    },
    Raw(String),
    Random,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        column: String,
        operator: String,
        value: DatabaseValue,
    },
    Raw {
        sql: String,
        args: Vec<DatabaseValue>,
    },
    In {
        column: String,
        values: Vec<DatabaseValue>,
        negated: bool,
    },
    Between {
        column: String,
        low: DatabaseValue,
        high: DatabaseValue,
        negated: bool,
    },
    Null {
        column: String,
        negated: bool,
    },
    Group(Vec<WhereClause>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    pub predicate: Predicate,
    pub or: bool,
}

pub type ScopeFn = Arc<dyn Fn(Query) -> Query + Send + Sync>;

/// How one relation is eager loaded
#[derive(Clone, Default)]
pub struct EagerLoad {
    pub wheres: Vec<WhereClause>,
    pub scope: Option<ScopeFn>,
    /// Relations loaded on the related model, keyed by name
    pub nested: BTreeMap<String, EagerLoad>,
}

impl fmt::Debug for EagerLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EagerLoad")
            .field("wheres", &self.wheres)
            .field("scoped", &self.scope.is_some())
            .field("nested", &self.nested)
            .finish()
    }
}

/// Everything a query has accumulated. Never mutated once shared; every
/// builder call clones it into a new `Arc`.
#[derive(Clone, Default)]
pub struct Conditions {
    pub table: Option<String>,
    pub model: Option<Arc<dyn Any + Send + Sync>>,
    pub wheres: Vec<WhereClause>,
    pub selects: Vec<String>,
    pub omits: Vec<String>,
    pub with: BTreeMap<String, EagerLoad>,
    pub joins: Vec<Join>,
    pub group_by: Vec<String>,
    pub having: Vec<WhereClause>,
    pub order_by: Vec<Order>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub lock: LockMode,
    pub with_trashed: bool,
    pub without_events: bool,
    pub distinct: bool,
    pub timeout: Option<Duration>,
}

impl fmt::Debug for Conditions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conditions")
            .field("table", &self.table)
            .field("model", &self.model.is_some())
            .field("wheres", &self.wheres)
            .field("selects", &self.selects)
            .field("omits", &self.omits)
            .field("with", &self.with)
            .field("joins", &self.joins)
            .field("group_by", &self.group_by)
            .field("having", &self.having)
            .field("order_by", &self.order_by)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .field("lock", &self.lock)
            .field("with_trashed", &self.with_trashed)
            .field("without_events", &self.without_events)
            .field("distinct", &self.distinct)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// One page of results
#[derive(Debug, Clone, PartialEq)]
pub struct Page<M> {
    pub items: Vec<M>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

impl<M> Page<M> {
    pub fn last_page(&self) -> i64 {
        if self.per_page <= 0 {
            return 1;
        }
        ((self.total + self.per_page - 1) / self.per_page).max(1)
    }
}
