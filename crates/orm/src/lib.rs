//! # keel-orm: query builder and lifecycle-event engine
//!
//! An immutable, fluent [`Query`] over plain serde structs, with lifecycle
//! hooks and dirty tracking, soft deletes, eager loading, transactions and
//! read/write-split connections across MySQL, PostgreSQL, SQLite and SQL Server.
//!
//! ```ignore
//! let orm = Orm::new(MemoryConfig::from_yaml(CONFIG)?);
//! let adults: Vec<User> = orm.query().where_("age", args![">=", 18]).get().await?;
//! ```

pub mod backends;
pub mod config;
pub mod connection;
pub mod error;
pub mod event_error;
pub mod events;
pub mod logging;
pub mod model;
pub mod observers;
pub mod orm;
pub mod query;
pub mod relationships;
pub mod transaction;

// Re-export core traits and types
pub use backends::{
    Attributes, Connector, DatabaseExecutor, DatabasePool, DatabaseTransaction, DatabaseValue,
    Dialect, ExecResult, IntoArgs, Row, SqlxConnector,
};
pub use config::{ConfigProvider, FullConfig, MemoryConfig, PoolSettings};
pub use connection::Access;
pub use error::{OrmError, OrmResult};
pub use event_error::EventError;
pub use events::{Dest, Event, EventKind, ModelObserver};
pub use model::{Model, ModelSchema};
pub use orm::Orm;
pub use query::{Page, Query, Statement, ASSOCIATIONS};
pub use relationships::{Relation, RelationKind};
pub use transaction::{IsolationLevel, Transaction, TransactionConfig};
