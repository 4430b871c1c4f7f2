//! Lifecycle events and dirty tracking
//!
//! An [`Event`] is built for one hook invocation. It carries the persisted
//! attributes (absent for creates), the incoming write (a model or a column map)
//! and the query that triggered it, and answers attribute and dirty-state
//! questions by any spelling of a column.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::backends::{Attributes, DatabaseValue};
use crate::error::OrmResult;
use crate::event_error::EventError;
use crate::model::{Model, ModelSchema};
use crate::query::select::ColumnFilter;
use crate::query::Query;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Retrieved,
    Creating,
    Created,
    Updating,
    Updated,
    Saving,
    Saved,
    Deleting,
    Deleted,
    ForceDeleting,
    ForceDeleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Retrieved => "retrieved",
            EventKind::Creating => "creating",
            EventKind::Created => "created",
            EventKind::Updating => "updating",
            EventKind::Updated => "updated",
            EventKind::Saving => "saving",
            EventKind::Saved => "saved",
            EventKind::Deleting => "deleting",
            EventKind::Deleted => "deleted",
            EventKind::ForceDeleting => "force_deleting",
            EventKind::ForceDeleted => "force_deleted",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The incoming write of an event
#[derive(Debug, Clone, PartialEq)]
pub enum Dest<M> {
    Model(M),
    Map(Attributes),
}

/// Lifecycle hooks for a model type. Every hook defaults to a no-op; an error
/// aborts the running pipeline and is returned to the caller unchanged.
#[async_trait]
pub trait ModelObserver<M: Model>: Send + Sync {
    async fn retrieved(&self, _event: &mut Event<M>) -> Result<(), EventError> {
        Ok(())
    }

    async fn creating(&self, _event: &mut Event<M>) -> Result<(), EventError> {
        Ok(())
    }

    async fn created(&self, _event: &mut Event<M>) -> Result<(), EventError> {
        Ok(())
    }

    async fn updating(&self, _event: &mut Event<M>) -> Result<(), EventError> {
        Ok(())
    }

    async fn updated(&self, _event: &mut Event<M>) -> Result<(), EventError> {
        Ok(())
    }

    async fn saving(&self, _event: &mut Event<M>) -> Result<(), EventError> {
        Ok(())
    }

    async fn saved(&self, _event: &mut Event<M>) -> Result<(), EventError> {
        Ok(())
    }

    async fn deleting(&self, _event: &mut Event<M>) -> Result<(), EventError> {
        Ok(())
    }

    async fn deleted(&self, _event: &mut Event<M>) -> Result<(), EventError> {
        Ok(())
    }

    async fn force_deleting(&self, _event: &mut Event<M>) -> Result<(), EventError> {
        Ok(())
    }

    async fn force_deleted(&self, _event: &mut Event<M>) -> Result<(), EventError> {
        Ok(())
    }
}

pub struct Event<M: Model> {
    kind: EventKind,
    query: Query,
    schema: Arc<ModelSchema>,
    original: Option<Attributes>,
    dest: Dest<M>,
    columns: ColumnFilter,
}

impl<M: Model> Event<M> {
    pub(crate) fn new(
        kind: EventKind,
        query: Query,
        schema: Arc<ModelSchema>,
        original: Option<Attributes>,
        dest: Dest<M>,
    ) -> Self {
        let columns = ColumnFilter::new(query.conditions(), &schema);
        let dest = match dest {
            Dest::Map(map) => Dest::Map(schema.normalize(map)),
            model => model,
        };

        Self {
            kind,
            query: query.fresh(),
            schema,
            original,
            dest,
            columns,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub(crate) fn set_kind(&mut self, kind: EventKind) {
        self.kind = kind;
    }

    /// A fresh query on the same connection (and transaction, if any)
    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn dest(&self) -> &Dest<M> {
        &self.dest
    }

    /// The incoming model, when the write is a struct
    pub fn model(&self) -> Option<&M> {
        match &self.dest {
            Dest::Model(model) => Some(model),
            Dest::Map(_) => None,
        }
    }

    pub fn model_mut(&mut self) -> Option<&mut M> {
        match &mut self.dest {
            Dest::Model(model) => Some(model),
            Dest::Map(_) => None,
        }
    }

    pub(crate) fn into_dest(self) -> Dest<M> {
        self.dest
    }

    /// Physical column for `name`; names unknown to the model are taken verbatim
    pub fn column_name(&self, name: &str) -> String {
        self.schema.column(name).unwrap_or(name).to_string()
    }

    /// Select wins over omit; with neither every column is valid
    pub fn is_valid_column(&self, column: &str) -> bool {
        self.columns.allows(&self.column_name(column))
    }

    fn dest_attributes(&self) -> OrmResult<Attributes> {
        match &self.dest {
            Dest::Map(map) => Ok(map.clone()),
            Dest::Model(model) => self.schema.to_attributes(model),
        }
    }

    /// Incoming columns for the boolean accessors, which have no error channel
    fn incoming(&self) -> Attributes {
        self.dest_attributes().unwrap_or_else(|err| {
            tracing::warn!(
                "Could not read {} attributes during {:?}: {}",
                self.schema.type_name(),
                self.kind,
                err
            );
            Attributes::new()
        })
    }

    /// The incoming value when it is valid and non-zero, else the original value
    pub fn get_attribute(&self, name: &str) -> Option<DatabaseValue> {
        let column = self.column_name(name);
        if self.is_valid_column(&column) {
            if let Some(value) = self.incoming().remove(&column) {
                if !value.is_zero() {
                    return Some(value);
                }
            }
        }
        self.get_original(name)
    }

    pub fn get_original(&self, name: &str) -> Option<DatabaseValue> {
        let column = self.column_name(name);
        self.original.as_ref()?.get(&column).cloned()
    }

    /// Write into the in-flight destination
    pub fn set_attribute(
        &mut self,
        name: &str,
        value: impl Into<DatabaseValue>,
    ) -> Result<(), EventError> {
        let column = self.column_name(name);
        let value = value.into();
        match &mut self.dest {
            Dest::Map(map) => {
                map.insert(column, value);
                Ok(())
            }
            Dest::Model(model) => self
                .schema
                .set_field(model, &column, value)
                .map_err(EventError::from),
        }
    }

    /// With no columns: whether any valid incoming column differs from the original.
    /// With columns: whether any of them is valid, part of the write, and differs.
    pub fn is_dirty(&self, columns: &[&str]) -> bool {
        let incoming = self.incoming();
        let differs = |column: &str, value: &DatabaseValue| -> bool {
            match self.original.as_ref().and_then(|original| original.get(column)) {
                Some(previous) => previous != value,
                None => true,
            }
        };

        if columns.is_empty() {
            return incoming
                .iter()
                .any(|(column, value)| self.is_valid_column(column) && differs(column, value));
        }

        columns.iter().any(|name| {
            let column = self.column_name(name);
            self.is_valid_column(&column)
                && incoming
                    .get(&column)
                    .map_or(false, |value| differs(&column, value))
        })
    }

    pub fn is_clean(&self, columns: &[&str]) -> bool {
        !self.is_dirty(columns)
    }

    /// Valid incoming columns that differ from the original
    pub(crate) fn dirty_attributes(&self) -> OrmResult<Attributes> {
        let original = self.original.as_ref();
        Ok(self
            .dest_attributes()?
            .into_iter()
            .filter(|(column, value)| {
                self.is_valid_column(column)
                    && original.and_then(|o| o.get(column)) != Some(value)
            })
            .collect())
    }
}

impl<M: Model + fmt::Debug> fmt::Debug for Event<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("kind", &self.kind)
            .field("original", &self.original)
            .field("dest", &self.dest)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::schema_of;
    use crate::{attrs, MemoryConfig, Orm};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Article {
        id: i64,
        title: String,
        view_count: i64,
    }

    impl Model for Article {}

    fn query() -> Query {
        Orm::new(MemoryConfig::new()).query()
    }

    fn update_event(query: Query, values: Attributes) -> Event<Article> {
        let schema = schema_of::<Article>().unwrap();
        let original = schema
            .to_attributes(&Article {
                id: 1,
                title: "draft".to_string(),
                view_count: 3,
            })
            .unwrap();
        Event::new(EventKind::Updating, query, schema, Some(original), Dest::Map(values))
    }

    #[test]
    fn test_dirty_tracking_by_any_spelling() {
        let event = update_event(query(), attrs! { "viewCount" => 4, "title" => "draft" });

        assert!(event.is_dirty(&[]));
        assert!(event.is_dirty(&["view_count"]));
        assert!(event.is_dirty(&["ViewCount"]));
        assert!(event.is_clean(&["title"]));
        assert!(event.is_clean(&["id"]));
        assert_eq!(event.dirty_attributes().unwrap(), attrs! { "view_count" => 4 });
    }

    /// Serializes only while unlocked
    #[derive(Debug, Clone, Default, PartialEq, Deserialize)]
    struct Vault(bool);

    impl Serialize for Vault {
        fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            if self.0 {
                return Err(serde::ser::Error::custom("vault is locked"));
            }
            serializer.serialize_bool(false)
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Safe {
        id: i64,
        vault: Vault,
    }

    impl Model for Safe {}

    #[test]
    fn test_unreadable_model_is_not_reported_clean() {
        let schema = schema_of::<Safe>().unwrap();
        let event = Event::new(
            EventKind::Updating,
            query(),
            schema,
            None,
            Dest::Model(Safe {
                id: 1,
                vault: Vault(true),
            }),
        );

        assert!(event.dirty_attributes().is_err());
        assert!(event.get_attribute("vault").is_none());
    }

    #[test]
    fn test_selected_columns_limit_what_counts() {
        let event = update_event(query().select(&["title"]), attrs! { "view_count" => 9 });

        assert!(!event.is_valid_column("view_count"));
        assert!(event.is_clean(&[]));
        assert!(event.dirty_attributes().unwrap().is_empty());
        // an excluded column reads back its original value
        assert_eq!(event.get_attribute("viewCount"), Some(DatabaseValue::Int64(3)));
    }

    #[test]
    fn test_omitted_columns_are_invalid() {
        let event = update_event(query().omit(&["title"]), attrs! { "title" => "final" });
        assert!(!event.is_valid_column("title"));
        assert!(event.is_valid_column("view_count"));
        assert!(event.is_clean(&["title"]));
    }

    #[test]
    fn test_zero_incoming_value_falls_back_to_original() {
        let event = update_event(query(), attrs! { "title" => "" });
        assert_eq!(
            event.get_attribute("title"),
            Some(DatabaseValue::String("draft".to_string()))
        );
        assert_eq!(event.get_original("title"), event.get_attribute("title"));
    }

    #[test]
    fn test_set_attribute_writes_the_destination() {
        let mut event = update_event(query(), Attributes::new());
        event.set_attribute("Title", "renamed").unwrap();
        assert!(event.is_dirty(&["title"]));
        assert_eq!(
            event.get_attribute("title"),
            Some(DatabaseValue::String("renamed".to_string()))
        );

        let schema = schema_of::<Article>().unwrap();
        let mut created = Event::new(
            EventKind::Creating,
            query(),
            schema,
            None,
            Dest::Model(Article::default()),
        );
        created.set_attribute("viewCount", 10).unwrap();
        assert_eq!(created.model().map(|a| a.view_count), Some(10));
        assert!(created.set_attribute("missing", 1).is_err());
    }

    #[test]
    fn test_event_query_is_fresh() {
        let event = update_event(query().where_eq("id", 1).limit(5), Attributes::new());
        assert!(event.query().conditions().wheres.is_empty());
        assert_eq!(event.query().conditions().limit, None);
        assert_eq!(event.kind().as_str(), "updating");
    }
}
