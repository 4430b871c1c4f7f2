//! Model System
//!
//! - `core_trait`: the Model trait
//! - `schema`: the cached field/column descriptor and struct <-> attribute mapping

pub mod core_trait;
pub mod schema;

pub use core_trait::Model;
pub use schema::{schema_of, snake_case, FieldInfo, FieldKind, ModelSchema};
