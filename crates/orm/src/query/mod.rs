//! Query Builder - fluent, copy-on-write query construction and execution

pub mod builder;
pub mod dml;
pub mod execution;
pub mod joins;
pub mod ordering;
pub mod pagination;
pub mod select;
pub mod sql_generation;
pub mod types;
pub mod where_clause;
pub mod with;

pub use builder::Query;
pub use sql_generation::Statement;
pub use types::*;
