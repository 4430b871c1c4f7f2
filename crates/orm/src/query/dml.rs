//! Query Builder DML operations (INSERT, UPDATE, DELETE)
//!
//! Each write runs its lifecycle pipeline: pre hooks may mutate or veto the
//! write, the statement runs, post hooks observe the result. Hooks fire only
//! for writes that identify a model; bulk writes by condition run silently.

use std::sync::Arc;

use chrono::Utc;

use crate::backends::{Attributes, DatabaseValue, ReturningStyle};
use crate::connection::Access;
use crate::error::{OrmError, OrmResult};
use crate::events::{Dest, Event, EventKind};
use crate::model::{Model, ModelSchema};
use crate::observers::Hooks;

use super::builder::Query;
use super::select::ColumnFilter;
use super::sql_generation::{key_clause, SqlWriter};

fn take_model<M: Model>(event: Event<M>, model: &mut M) {
    if let Dest::Model(updated) = event.into_dest() {
        *model = updated;
    }
}

/// Set the timestamp columns a write is responsible for
fn touch_timestamps<M: Model>(schema: &ModelSchema, model: &mut M, creating: bool) -> OrmResult<()> {
    let now = Utc::now();
    let attributes = schema.to_attributes(model)?;
    if creating {
        if let Some(column) = schema.created_at_column() {
            if attributes.get(column).map_or(true, DatabaseValue::is_zero) {
                schema.set_field(model, column, now.into())?;
            }
        }
    }
    if let Some(column) = schema.updated_at_column() {
        if creating && !attributes.get(column).map_or(true, DatabaseValue::is_zero) {
            return Ok(());
        }
        schema.set_field(model, column, now.into())?;
    }
    Ok(())
}

impl Query {
    fn writer<'a>(&'a self, schema: &'a ModelSchema, table: &'a str) -> OrmResult<SqlWriter<'a>> {
        Ok(SqlWriter::new(self.dialect()?, &self.conditions, table, Some(schema)))
    }

    /// Insert `model`, firing saving, creating, created and saved
    pub async fn create<M: Model>(&self, model: &mut M) -> OrmResult<()> {
        let query = self.bind_for::<M>()?;
        query.validate()?;
        query.insert_model(model).await
    }

    /// Insert each model in order with its own hooks; stops at the first failure
    pub async fn create_many<M: Model>(&self, models: &mut [M]) -> OrmResult<()> {
        let query = self.bind_for::<M>()?;
        query.validate()?;
        for model in models.iter_mut() {
            query.insert_model(model).await?;
        }
        Ok(())
    }

    pub(crate) async fn insert_model<M: Model>(&self, model: &mut M) -> OrmResult<()> {
        let (schema, table) = self.target::<M>()?;
        let hooks = self.hooks::<M>();

        if !hooks.is_empty() {
            let mut event = Event::new(
                EventKind::Saving,
                self.clone(),
                Arc::clone(&schema),
                None,
                Dest::Model(model.clone()),
            );
            hooks.fire(EventKind::Saving, &mut event).await?;
            hooks.fire(EventKind::Creating, &mut event).await?;
            take_model(event, model);
        }

        touch_timestamps(&schema, model, true)?;
        let filter = ColumnFilter::new(&self.conditions, &schema);
        let key = schema.primary_key().to_string();
        let mut generated_key = true;
        let (columns, values): (Vec<String>, Vec<DatabaseValue>) = schema
            .to_attributes(model)?
            .into_iter()
            .filter(|(column, value)| {
                if *column == key && !value.is_zero() {
                    generated_key = false;
                }
                !value.is_null() && !(*column == key && value.is_zero()) && filter.allows(column)
            })
            .unzip();

        let dialect = self.dialect()?;
        let returning = match dialect.returning_style() {
            ReturningStyle::LastInsertId => None,
            _ if generated_key => Some(key.as_str()),
            _ => None,
        };
        let statement = self
            .writer(&schema, &table)?
            .insert(&columns, vec![values], returning);

        let id = if returning.is_some() {
            let rows = self.run_fetch(Access::Write, &statement).await?;
            rows.first().and_then(|row| row.get_by_index(0)).cloned()
        } else {
            let result = self.run_exec(Access::Write, &statement).await?;
            result.last_insert_id.map(DatabaseValue::Int64)
        };
        if generated_key {
            if let Some(id) = id.filter(|id| !id.is_zero()) {
                schema.set_field(model, &key, id)?;
            }
        }

        if self.cascades_associations() {
            self.save_associations(&schema, model).await?;
        }

        if !hooks.is_empty() {
            let mut event = Event::new(
                EventKind::Created,
                self.clone(),
                Arc::clone(&schema),
                None,
                Dest::Model(model.clone()),
            );
            hooks.fire(EventKind::Created, &mut event).await?;
            hooks.fire(EventKind::Saved, &mut event).await?;
            take_model(event, model);
        }
        Ok(())
    }

    /// Persist children held in `model`'s relation slots
    async fn save_associations<M: Model>(&self, schema: &ModelSchema, model: &mut M) -> OrmResult<()> {
        let attributes = schema.to_attributes(model)?;
        for relation in M::relations() {
            let owner_column = schema
                .column(relation.owner_column())
                .unwrap_or(relation.owner_column());
            let owner_key = attributes.get(owner_column).cloned().unwrap_or_default();
            let children = schema.relation_value(model, relation.name())?;
            if children.is_null() {
                continue;
            }
            if let Some(saving) = relation.save(self.fresh(), children, owner_key) {
                let saved = saving.await?;
                schema.set_relation(model, relation.name(), saved)?;
            }
        }
        Ok(())
    }

    /// Insert when the primary key is zero, else write every column back
    pub async fn save<M: Model>(&self, model: &mut M) -> OrmResult<()> {
        let query = self.bind_for::<M>()?;
        query.validate()?;
        let schema = crate::model::schema_of::<M>()?;
        let key = schema.primary_key_value(model)?;
        if key.is_zero() {
            return query.insert_model(model).await;
        }
        query.save_existing(model).await
    }

    /// [`Query::save`] without hooks
    pub async fn save_quietly<M: Model>(&self, model: &mut M) -> OrmResult<()> {
        self.without_events().save(model).await
    }

    async fn save_existing<M: Model>(&self, model: &mut M) -> OrmResult<()> {
        let (schema, table) = self.target::<M>()?;
        let hooks = self.hooks::<M>();
        let original = schema.to_attributes(model)?;

        if !hooks.is_empty() {
            let mut event = Event::new(
                EventKind::Saving,
                self.clone(),
                Arc::clone(&schema),
                Some(original.clone()),
                Dest::Model(model.clone()),
            );
            hooks.fire(EventKind::Saving, &mut event).await?;
            hooks.fire(EventKind::Updating, &mut event).await?;
            take_model(event, model);
        }

        touch_timestamps(&schema, model, false)?;
        let filter = ColumnFilter::new(&self.conditions, &schema);
        let key = schema.primary_key().to_string();
        let mut sets = schema.to_attributes(model)?;
        let key_value = sets.remove(&key).unwrap_or_default();
        sets.retain(|column, _| filter.allows(column));

        if !sets.is_empty() {
            let statement = self
                .writer(&schema, &table)?
                .update(&sets, vec![key_clause(&key, key_value)]);
            self.run_exec(Access::Write, &statement).await?;
        }

        if self.cascades_associations() {
            self.save_associations(&schema, model).await?;
        }

        if !hooks.is_empty() {
            let mut event = Event::new(
                EventKind::Updated,
                self.clone(),
                Arc::clone(&schema),
                Some(original),
                Dest::Model(model.clone()),
            );
            hooks.fire(EventKind::Updated, &mut event).await?;
            hooks.fire(EventKind::Saved, &mut event).await?;
            take_model(event, model);
        }
        Ok(())
    }

    /// Update columns. With a model bound via [`Query::model`] only dirty columns
    /// are written and hooks fire; otherwise a condition is required and no hooks run.
    pub async fn update<M: Model>(&self, values: Attributes) -> OrmResult<u64> {
        let query = self.bind_for::<M>()?;
        query.validate()?;
        query.update_attributes::<M>(values).await
    }

    pub async fn update_column<M: Model>(
        &self,
        column: &str,
        value: impl Into<DatabaseValue>,
    ) -> OrmResult<u64> {
        let mut values = Attributes::new();
        values.insert(column.to_string(), value.into());
        self.update::<M>(values).await
    }

    /// Update from a partially filled struct; zero-valued fields are skipped
    pub async fn update_with<M: Model>(&self, values: &M) -> OrmResult<u64> {
        let schema = crate::model::schema_of::<M>()?;
        let mut attributes = schema.to_attributes(values)?;
        attributes.retain(|_, value| !value.is_zero());
        attributes.remove(schema.primary_key());
        self.update::<M>(attributes).await
    }

    async fn update_attributes<M: Model>(&self, values: Attributes) -> OrmResult<u64> {
        let (schema, table) = self.target::<M>()?;
        let values = schema.normalize(values);

        if let Some(model) = self.bound_model::<M>() {
            let key = schema.primary_key_value(&model)?;
            if !key.is_zero() {
                let (rows_affected, _) =
                    self.update_identified(&schema, &table, model, key, values).await?;
                return Ok(rows_affected);
            }
        }

        if self.conditions.wheres.is_empty() {
            return Err(OrmError::MissingWhereClause);
        }
        let filter = ColumnFilter::new(&self.conditions, &schema);
        let mut sets: Attributes = values
            .into_iter()
            .filter(|(column, _)| filter.allows(column))
            .collect();
        if sets.is_empty() {
            return Ok(0);
        }
        if let Some(column) = schema.updated_at_column() {
            sets.entry(column.to_string())
                .or_insert_with(|| Utc::now().into());
        }
        let statement = self.writer(&schema, &table)?.update(&sets, Vec::new());
        Ok(self.run_exec(Access::Write, &statement).await?.rows_affected)
    }

    async fn update_identified<M: Model>(
        &self,
        schema: &Arc<ModelSchema>,
        table: &str,
        model: M,
        key: DatabaseValue,
        values: Attributes,
    ) -> OrmResult<(u64, Attributes)> {
        let hooks = self.hooks::<M>();
        let original = schema.to_attributes(&model)?;
        let mut event = Event::new(
            EventKind::Saving,
            self.clone(),
            Arc::clone(schema),
            Some(original),
            Dest::Map(values),
        );
        hooks.fire(EventKind::Saving, &mut event).await?;
        hooks.fire(EventKind::Updating, &mut event).await?;

        let mut sets = event.dirty_attributes()?;
        sets.remove(schema.primary_key());
        let mut rows_affected = 0;
        if !sets.is_empty() {
            if let Some(column) = schema.updated_at_column() {
                sets.entry(column.to_string())
                    .or_insert_with(|| Utc::now().into());
            }
            let statement = self
                .writer(schema, table)?
                .update(&sets, vec![key_clause(schema.primary_key(), key)]);
            rows_affected = self.run_exec(Access::Write, &statement).await?.rows_affected;
        }

        hooks.fire(EventKind::Updated, &mut event).await?;
        hooks.fire(EventKind::Saved, &mut event).await?;
        Ok((rows_affected, sets))
    }

    /// Delete `model` (soft delete when the model declares a deleted-at column).
    /// A model without a primary key deletes by the query's conditions instead.
    pub async fn delete<M: Model>(&self, model: &M) -> OrmResult<u64> {
        let query = self.bind_for::<M>()?;
        query.validate()?;
        query.delete_model(model, false).await
    }

    /// Hard delete, bypassing soft delete
    pub async fn force_delete<M: Model>(&self, model: &M) -> OrmResult<u64> {
        let query = self.bind_for::<M>()?;
        query.validate()?;
        query.delete_model(model, true).await
    }

    async fn delete_model<M: Model>(&self, model: &M, force: bool) -> OrmResult<u64> {
        let (schema, table) = self.target::<M>()?;
        let key = schema.primary_key_value(model)?;
        let identified = !key.is_zero();
        if !identified && self.conditions.wheres.is_empty() {
            return Err(OrmError::MissingWhereClause);
        }

        let hooks = if identified { self.hooks::<M>() } else { Hooks::none() };
        let (before, after) = if force {
            (EventKind::ForceDeleting, EventKind::ForceDeleted)
        } else {
            (EventKind::Deleting, EventKind::Deleted)
        };
        let mut event = None;
        if !hooks.is_empty() {
            let mut pending = Event::new(
                before,
                self.clone(),
                Arc::clone(&schema),
                Some(schema.to_attributes(model)?),
                Dest::Model(model.clone()),
            );
            hooks.fire(before, &mut pending).await?;
            event = Some(pending);
        }

        let keys = if identified {
            vec![key_clause(schema.primary_key(), key)]
        } else {
            Vec::new()
        };
        let writer = self.writer(&schema, &table)?;
        let statement = match schema.soft_delete_column().filter(|_| !force) {
            Some(column) => {
                let mut sets = Attributes::new();
                sets.insert(column.to_string(), Utc::now().into());
                writer.update(&sets, keys)
            }
            None => writer.delete(keys),
        };
        let rows_affected = self.run_exec(Access::Write, &statement).await?.rows_affected;

        if let Some(mut event) = event {
            hooks.fire(after, &mut event).await?;
        }
        Ok(rows_affected)
    }

    /// Clear the deleted-at column of `model`, or of every row matching the conditions
    pub async fn restore<M: Model>(&self, model: &M) -> OrmResult<u64> {
        let query = self.bind_for::<M>()?.with_trashed();
        query.validate()?;
        let (schema, table) = query.target::<M>()?;
        let Some(column) = schema.soft_delete_column() else {
            return Err(OrmError::InvalidModel(format!(
                "{} does not support soft deletes",
                schema.type_name()
            )));
        };

        let key = schema.primary_key_value(model)?;
        let keys = if key.is_zero() {
            if query.conditions.wheres.is_empty() {
                return Err(OrmError::MissingWhereClause);
            }
            Vec::new()
        } else {
            vec![key_clause(schema.primary_key(), key)]
        };
        let mut sets = Attributes::new();
        sets.insert(column.to_string(), DatabaseValue::Null);
        let statement = query.writer(&schema, &table)?.update(&sets, keys);
        Ok(query.run_exec(Access::Write, &statement).await?.rows_affected)
    }

    /// First match for `attributes`, or an unsaved model built from `attributes` and `values`
    pub async fn first_or_new<M: Model>(&self, attributes: Attributes, values: Attributes) -> OrmResult<M> {
        if let Some(found) = self.where_attributes(&attributes).first::<M>().await? {
            return Ok(found);
        }
        build_model::<M>(&attributes, &values)
    }

    /// First match for `attributes`, or a newly created one
    pub async fn first_or_create<M: Model>(&self, attributes: Attributes, values: Attributes) -> OrmResult<M> {
        if let Some(found) = self.where_attributes(&attributes).first::<M>().await? {
            return Ok(found);
        }
        let mut model = build_model::<M>(&attributes, &values)?;
        self.create(&mut model).await?;
        Ok(model)
    }

    /// Update the first match for `attributes` with `values`, or create it
    pub async fn update_or_create<M: Model>(&self, attributes: Attributes, values: Attributes) -> OrmResult<M> {
        match self.where_attributes(&attributes).first::<M>().await? {
            Some(mut found) => {
                let query = self.model(&found).bind_for::<M>()?;
                query.validate()?;
                let (schema, table) = query.target::<M>()?;
                let key = schema.primary_key_value(&found)?;
                if key.is_zero() {
                    query.update_attributes::<M>(values.clone()).await?;
                    schema.assign(&mut found, &values)?;
                    return Ok(found);
                }
                // the written set includes the touched updated-at column
                let values = schema.normalize(values);
                let (_, written) = query
                    .update_identified(&schema, &table, found.clone(), key, values)
                    .await?;
                schema.assign(&mut found, &written)?;
                Ok(found)
            }
            None => {
                let mut model = build_model::<M>(&attributes, &values)?;
                self.create(&mut model).await?;
                Ok(model)
            }
        }
    }
}

fn build_model<M: Model>(attributes: &Attributes, values: &Attributes) -> OrmResult<M> {
    let schema = crate::model::schema_of::<M>()?;
    let mut model = M::default();
    schema.assign(&mut model, attributes)?;
    schema.assign(&mut model, values)?;
    Ok(model)
}
