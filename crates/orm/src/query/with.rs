//! Query Builder WITH Methods - eager loading
//!
//! `with("posts.comments")` records a tree of relations to load. After the
//! parent rows are hydrated, each relation is fetched with one `IN` query over
//! the collected owner keys and the results are distributed by key.

use std::collections::{HashMap, HashSet};

use serde_json::Value as JsonValue;

use crate::backends::{DatabaseValue, IntoArgs};
use crate::error::{OrmError, OrmResult};
use crate::model::{schema_of, Model};
use crate::relationships::{Relation, RelationKind};

use super::builder::Query;
use super::types::*;
use super::where_clause::infer_predicate;

impl Query {
    fn with_load(&self, path: &str, configure: impl FnOnce(&mut EagerLoad)) -> Query {
        let segments: Vec<String> = path
            .split('.')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();
        if segments.is_empty() {
            return self.clone();
        }
        self.derive(|c| {
            let (last, parents) = match segments.split_last() {
                Some(split) => split,
                None => return,
            };
            let mut level = &mut c.with;
            for segment in parents {
                level = &mut level.entry(segment.clone()).or_default().nested;
            }
            configure(level.entry(last.clone()).or_default());
        })
    }

    /// Eager load a relation; dotted paths load nested relations
    pub fn with(&self, relation: &str) -> Query {
        self.with_load(relation, |_| {})
    }

    /// Eager load with a condition on the related rows
    pub fn with_where(&self, relation: &str, query: &str, args: impl IntoArgs) -> Query {
        let predicate = infer_predicate(query, args.into_args());
        self.with_load(relation, move |load| {
            load.wheres = vec![WhereClause {
                predicate,
                or: false,
            }];
        })
    }

    /// Eager load with a builder callback applied to the related query
    pub fn with_scope(
        &self,
        relation: &str,
        scope: impl Fn(Query) -> Query + Send + Sync + 'static,
    ) -> Query {
        let scope: ScopeFn = std::sync::Arc::new(scope);
        self.with_load(relation, move |load| load.scope = Some(scope))
    }

    pub(crate) async fn eager_load<M: Model>(&self, models: &mut [M]) -> OrmResult<()> {
        if self.conditions.with.is_empty() || models.is_empty() {
            return Ok(());
        }
        let relations = M::relations();
        for (name, load) in &self.conditions.with {
            let relation = find_relation(&relations, name)?;
            self.load_relation(relation, load, models).await?;
        }
        Ok(())
    }

    async fn load_relation<M: Model>(
        &self,
        relation: &Relation<M>,
        load: &EagerLoad,
        models: &mut [M],
    ) -> OrmResult<()> {
        let schema = schema_of::<M>()?;
        let owner_column = schema
            .column(relation.owner_column())
            .unwrap_or(relation.owner_column())
            .to_string();

        let mut owner_keys = Vec::with_capacity(models.len());
        for model in models.iter() {
            let key = schema
                .to_attributes(model)?
                .remove(&owner_column)
                .unwrap_or_default();
            owner_keys.push(key);
        }

        let mut seen = HashSet::new();
        let keys: Vec<DatabaseValue> = owner_keys
            .iter()
            .filter(|key| !key.is_null() && seen.insert(key.key_string()))
            .cloned()
            .collect();

        let mut grouped: HashMap<String, Vec<JsonValue>> = HashMap::new();
        if !keys.is_empty() {
            let wheres = load.wheres.clone();
            let nested = load.nested.clone();
            let mut related = self.fresh().derive(move |c| {
                if wheres.iter().skip(1).any(|clause| clause.or) {
                    c.wheres = vec![WhereClause {
                        predicate: Predicate::Group(wheres),
                        or: false,
                    }];
                } else {
                    c.wheres = wheres;
                }
                c.with = nested;
            });
            if let Some(scope) = &load.scope {
                related = scope(related);
            }

            for record in relation.load(related, keys).await? {
                grouped
                    .entry(record.key.key_string())
                    .or_default()
                    .push(record.value);
            }
        }

        for (model, key) in models.iter_mut().zip(owner_keys) {
            let matches = grouped.get(&key.key_string()).cloned().unwrap_or_default();
            let value = match relation.kind() {
                RelationKind::HasMany => JsonValue::Array(matches),
                RelationKind::HasOne | RelationKind::BelongsTo => {
                    matches.into_iter().next().unwrap_or(JsonValue::Null)
                }
            };
            schema.set_relation(model, relation.name(), value)?;
        }
        Ok(())
    }

    /// Load a relation onto an already fetched model. Conditions registered with
    /// `with_where`/`with_scope` for the same relation apply.
    pub async fn load<M: Model>(&self, model: &mut M, relation: &str) -> OrmResult<()> {
        let query = self.bind_for::<M>()?.with(relation);
        let head = relation.split('.').next().unwrap_or(relation).trim();
        let load = query.conditions.with.get(head).cloned().unwrap_or_default();
        let relations = M::relations();
        let found = find_relation(&relations, head)?;
        query
            .load_relation(found, &load, std::slice::from_mut(model))
            .await
    }

    /// [`Query::load`] unless the relation slot already holds data
    pub async fn load_missing<M: Model>(&self, model: &mut M, relation: &str) -> OrmResult<()> {
        let head = relation.split('.').next().unwrap_or(relation).trim();
        let current = schema_of::<M>()?.relation_value(model, head)?;
        if is_loaded(&current) {
            return Ok(());
        }
        self.load(model, relation).await
    }
}

fn find_relation<'a, M: Model>(relations: &'a [Relation<M>], name: &str) -> OrmResult<&'a Relation<M>> {
    relations
        .iter()
        .find(|relation| relation.name() == name)
        .ok_or_else(|| {
            OrmError::Relation(format!(
                "{} has no relation named '{}'",
                std::any::type_name::<M>(),
                name
            ))
        })
}

/// A non-empty list, or an object with any non-zero field
fn is_loaded(value: &JsonValue) -> bool {
    match value {
        JsonValue::Array(items) => !items.is_empty(),
        JsonValue::Object(fields) => fields
            .values()
            .any(|field| !DatabaseValue::from_json(field.clone()).is_zero()),
        _ => false,
    }
}
