//! Connection Management
//!
//! Lazily opened named connections and read/write routing.

pub mod registry;

pub use registry::{Access, Connection, ConnectionRegistry};
