//! Relationships - relation declarations used by eager loading and association saves
//!
//! A relation names a field on the owning model that holds related records
//! (`Vec<R>` for has-many, `Option<R>` for has-one and belongs-to) and the key
//! columns linking the two tables. The typed work (querying and saving `R`) is
//! captured in boxed closures so the owner's relation list stays homogeneous.

use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value as JsonValue;

use crate::backends::DatabaseValue;
use crate::error::OrmResult;
use crate::model::{schema_of, Model};
use crate::query::Query;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    HasOne,
    HasMany,
    BelongsTo,
}

/// A related record and the value of its matching key column
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedRecord {
    pub key: DatabaseValue,
    pub value: JsonValue,
}

pub(crate) type LoadFn =
    Arc<dyn Fn(Query, String, Vec<DatabaseValue>) -> BoxFuture<'static, OrmResult<Vec<LoadedRecord>>> + Send + Sync>;

pub(crate) type SaveFn =
    Arc<dyn Fn(Query, JsonValue, String, DatabaseValue) -> BoxFuture<'static, OrmResult<JsonValue>> + Send + Sync>;

pub struct Relation<M> {
    name: &'static str,
    kind: RelationKind,
    foreign_key: &'static str,
    /// has-one/has-many: key on the owner. belongs-to: key on the related model.
    local_key: &'static str,
    load: LoadFn,
    save: Option<SaveFn>,
    _owner: PhantomData<fn() -> M>,
}

impl<M> Clone for Relation<M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            kind: self.kind,
            foreign_key: self.foreign_key,
            local_key: self.local_key,
            load: Arc::clone(&self.load),
            save: self.save.clone(),
            _owner: PhantomData,
        }
    }
}

impl<M: Model> Relation<M> {
    /// `R.foreign_key` references the owner's primary key; the field holds `Vec<R>`
    pub fn has_many<R: Model>(name: &'static str, foreign_key: &'static str) -> Self {
        Self {
            name,
            kind: RelationKind::HasMany,
            foreign_key,
            local_key: M::primary_key(),
            load: loader::<R>(),
            save: Some(has_many_saver::<R>()),
            _owner: PhantomData,
        }
    }

    /// `R.foreign_key` references the owner's primary key; the field holds `Option<R>`
    pub fn has_one<R: Model>(name: &'static str, foreign_key: &'static str) -> Self {
        Self {
            name,
            kind: RelationKind::HasOne,
            foreign_key,
            local_key: M::primary_key(),
            load: loader::<R>(),
            save: Some(has_one_saver::<R>()),
            _owner: PhantomData,
        }
    }

    /// The owner's `foreign_key` references `R`'s primary key; the field holds `Option<R>`
    pub fn belongs_to<R: Model>(name: &'static str, foreign_key: &'static str) -> Self {
        Self {
            name,
            kind: RelationKind::BelongsTo,
            foreign_key,
            local_key: R::primary_key(),
            load: loader::<R>(),
            save: None,
            _owner: PhantomData,
        }
    }

    /// Override the referenced key (owner key for has-*, owner-side target for belongs-to)
    pub fn local_key(mut self, key: &'static str) -> Self {
        self.local_key = key;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    pub fn foreign_key(&self) -> &'static str {
        self.foreign_key
    }

    /// Column on the owner whose values select the related rows
    pub(crate) fn owner_column(&self) -> &'static str {
        match self.kind {
            RelationKind::HasOne | RelationKind::HasMany => self.local_key,
            RelationKind::BelongsTo => self.foreign_key,
        }
    }

    /// Column on the related model matched against the owner values
    pub(crate) fn related_column(&self) -> &'static str {
        match self.kind {
            RelationKind::HasOne | RelationKind::HasMany => self.foreign_key,
            RelationKind::BelongsTo => self.local_key,
        }
    }

    pub(crate) fn load(
        &self,
        query: Query,
        keys: Vec<DatabaseValue>,
    ) -> BoxFuture<'static, OrmResult<Vec<LoadedRecord>>> {
        (self.load)(query, self.related_column().to_string(), keys)
    }

    /// Persist children held in the relation slot; `None` for relations that do not cascade
    pub(crate) fn save(
        &self,
        query: Query,
        children: JsonValue,
        owner_key: DatabaseValue,
    ) -> Option<BoxFuture<'static, OrmResult<JsonValue>>> {
        let save = self.save.as_ref()?;
        Some(save(query, children, self.foreign_key.to_string(), owner_key))
    }
}

fn loader<R: Model>() -> LoadFn {
    Arc::new(|query, column, keys| load_related::<R>(query, column, keys).boxed())
}

fn has_many_saver<R: Model>() -> SaveFn {
    Arc::new(|query, children, foreign_key, owner_key| {
        save_many::<R>(query, children, foreign_key, owner_key).boxed()
    })
}

fn has_one_saver<R: Model>() -> SaveFn {
    Arc::new(|query, child, foreign_key, owner_key| {
        save_one::<R>(query, child, foreign_key, owner_key).boxed()
    })
}

async fn load_related<R: Model>(
    query: Query,
    column: String,
    keys: Vec<DatabaseValue>,
) -> OrmResult<Vec<LoadedRecord>> {
    let schema = schema_of::<R>()?;
    let column = schema.column(&column).unwrap_or(&column).to_string();
    let records: Vec<R> = query.where_in(&column, keys).get::<R>().await?;

    let mut loaded = Vec::with_capacity(records.len());
    for record in records {
        let key = schema
            .to_attributes(&record)?
            .remove(&column)
            .unwrap_or_default();
        loaded.push(LoadedRecord {
            key,
            value: serde_json::to_value(&record)?,
        });
    }
    Ok(loaded)
}

async fn save_many<R: Model>(
    query: Query,
    children: JsonValue,
    foreign_key: String,
    owner_key: DatabaseValue,
) -> OrmResult<JsonValue> {
    if children.is_null() {
        return Ok(children);
    }
    let schema = schema_of::<R>()?;
    let mut records: Vec<R> = serde_json::from_value(children)?;
    for record in records.iter_mut() {
        schema.set_field(record, &foreign_key, owner_key.clone())?;
        query.save(record).await?;
    }
    Ok(serde_json::to_value(&records)?)
}

async fn save_one<R: Model>(
    query: Query,
    child: JsonValue,
    foreign_key: String,
    owner_key: DatabaseValue,
) -> OrmResult<JsonValue> {
    let record: Option<R> = serde_json::from_value(child)?;
    let Some(mut record) = record else {
        return Ok(JsonValue::Null);
    };
    schema_of::<R>()?.set_field(&mut record, &foreign_key, owner_key)?;
    query.save(&mut record).await?;
    Ok(serde_json::to_value(&record)?)
}
