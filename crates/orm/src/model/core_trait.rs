//! Core Model Trait - Base definition for database entities
//!
//! Defines the Model trait with table metadata, primary key, soft-delete and
//! timestamp configuration, relations, and the optional self-observer.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::events::ModelObserver;
use crate::relationships::Relation;

/// Core trait for database models.
///
/// Field values travel through serde, so a model is any plain struct that
/// serializes to a map. Fields named after [`Model::relations`] are treated as
/// relation slots rather than columns.
pub trait Model: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static {
    /// Explicit table name. When `None` the name is derived from the type name,
    /// snake_cased and pluralized, with the connection's prefix applied.
    fn table_name() -> Option<&'static str> {
        None
    }

    /// Primary key column
    fn primary_key() -> &'static str {
        "id"
    }

    /// Connection this model lives on; `None` uses whatever the query is bound to
    fn connection() -> Option<&'static str> {
        None
    }

    /// Soft-delete timestamp column
    fn soft_delete_column() -> Option<&'static str> {
        None
    }

    /// Filled on insert when the model has this column
    fn created_at_column() -> Option<&'static str> {
        Some("created_at")
    }

    /// Filled on insert and refreshed on update when the model has this column
    fn updated_at_column() -> Option<&'static str> {
        Some("updated_at")
    }

    /// Field name to physical column overrides
    fn column_overrides() -> &'static [(&'static str, &'static str)] {
        &[]
    }

    fn relations() -> Vec<Relation<Self>> {
        Vec::new()
    }

    /// Hooks implemented by the model itself. When present, observers
    /// registered for the type are not consulted.
    fn observer() -> Option<Arc<dyn ModelObserver<Self>>> {
        None
    }
}
