//! Database Backend Abstractions
//!
//! The executor traits the engine runs statements through, the dialect
//! translator, and the default sqlx-backed connector.

pub mod any;
pub mod core;
pub mod dialect;

// Re-export core traits and types
pub use any::SqlxConnector;
pub use core::*;
pub use dialect::{Dialect, ReturningStyle};
