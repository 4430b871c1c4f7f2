//! Model schema descriptors
//!
//! A schema is derived once per model type by serializing `M::default()` and is
//! cached for the life of the process. It maps every spelling of a field (field
//! name, snake_case name, explicit column override, case-insensitive forms) to the
//! physical column and converts between structs and [`Attributes`].

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde_json::{Map, Value as JsonValue};

use crate::backends::{Attributes, DatabaseValue};
use crate::config::FullConfig;
use crate::error::{OrmError, OrmResult};
use crate::model::Model;

static SCHEMAS: Lazy<DashMap<TypeId, Arc<ModelSchema>>> = Lazy::new(DashMap::new);

/// Shape of a field's default value, used to coerce loosely typed driver values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    Integer,
    Float,
    Text,
    Timestamp,
    Bytes,
    /// `Option<_>` and nested values
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub name: String,
    pub column: String,
    pub kind: FieldKind,
}

#[derive(Debug)]
pub struct ModelSchema {
    type_name: String,
    explicit_table: Option<String>,
    primary_key: String,
    fields: Vec<FieldInfo>,
    exact: HashMap<String, usize>,
    folded: HashMap<String, usize>,
    relations: Vec<String>,
    soft_delete: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
}

/// Cached schema for `M`, built on first use
pub fn schema_of<M: Model>() -> OrmResult<Arc<ModelSchema>> {
    let key = TypeId::of::<M>();
    if let Some(schema) = SCHEMAS.get(&key) {
        return Ok(Arc::clone(schema.value()));
    }

    let schema = Arc::new(ModelSchema::build::<M>()?);
    SCHEMAS.insert(key, Arc::clone(&schema));
    Ok(schema)
}

impl ModelSchema {
    fn build<M: Model>() -> OrmResult<Self> {
        let type_name = short_type_name(std::any::type_name::<M>());
        let object = match serde_json::to_value(M::default())? {
            JsonValue::Object(map) => map,
            _ => {
                return Err(OrmError::InvalidModel(format!(
                    "{} must serialize to a map of fields",
                    type_name
                )))
            }
        };

        let relations: Vec<String> = M::relations()
            .iter()
            .map(|relation| relation.name().to_string())
            .collect();
        let overrides: HashMap<&str, &str> = M::column_overrides().iter().copied().collect();

        let mut schema = ModelSchema {
            type_name,
            explicit_table: M::table_name().map(str::to_string),
            primary_key: String::new(),
            fields: Vec::new(),
            exact: HashMap::new(),
            folded: HashMap::new(),
            relations,
            soft_delete: None,
            created_at: None,
            updated_at: None,
        };

        for (name, default) in &object {
            if schema.relations.iter().any(|relation| relation == name) {
                continue;
            }
            let column = overrides
                .get(name.as_str())
                .map(|column| column.to_string())
                .unwrap_or_else(|| snake_case(name));
            let index = schema.fields.len();

            for spelling in [name.clone(), column.clone(), snake_case(name)] {
                schema.folded.entry(spelling.to_lowercase()).or_insert(index);
                schema.exact.entry(spelling).or_insert(index);
            }
            schema.fields.push(FieldInfo {
                name: name.clone(),
                column,
                kind: kind_of(default),
            });
        }

        schema.primary_key = schema
            .column(M::primary_key())
            .unwrap_or(M::primary_key())
            .to_string();
        schema.soft_delete = M::soft_delete_column().and_then(|c| schema.column(c)).map(str::to_string);
        schema.created_at = M::created_at_column().and_then(|c| schema.column(c)).map(str::to_string);
        schema.updated_at = M::updated_at_column().and_then(|c| schema.column(c)).map(str::to_string);

        Ok(schema)
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Table for this model on a connection
    pub fn table(&self, config: &FullConfig) -> String {
        if let Some(table) = &self.explicit_table {
            return table.clone();
        }
        let base = snake_case(&self.type_name);
        let name = if config.singular { base } else { pluralize(&base) };
        format!("{}{}", config.prefix, name)
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn soft_delete_column(&self) -> Option<&str> {
        self.soft_delete.as_deref()
    }

    pub fn created_at_column(&self) -> Option<&str> {
        self.created_at.as_deref()
    }

    pub fn updated_at_column(&self) -> Option<&str> {
        self.updated_at.as_deref()
    }

    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    pub fn is_relation(&self, name: &str) -> bool {
        self.relations.iter().any(|relation| relation == name)
    }

    /// Physical column for any accepted spelling of a field
    pub fn column(&self, name: &str) -> Option<&str> {
        self.field(name).map(|field| field.column.as_str())
    }

    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        let index = self
            .exact
            .get(name)
            .or_else(|| self.folded.get(&name.to_lowercase()))
            .or_else(|| self.folded.get(&snake_case(name)))?;
        self.fields.get(*index)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Normalize caller-supplied keys to physical columns; unknown keys pass through
    pub fn normalize(&self, attributes: Attributes) -> Attributes {
        attributes
            .into_iter()
            .map(|(key, value)| match self.column(&key) {
                Some(column) => (column.to_string(), value),
                None => (key, value),
            })
            .collect()
    }

    /// Column values of a model, relation slots excluded
    pub fn to_attributes<M: Model>(&self, model: &M) -> OrmResult<Attributes> {
        let object = to_object(model)?;
        Ok(self
            .fields
            .iter()
            .map(|field| {
                let value = object.get(&field.name).cloned().unwrap_or(JsonValue::Null);
                (field.column.clone(), DatabaseValue::from_json(value))
            })
            .collect())
    }

    pub fn primary_key_value<M: Model>(&self, model: &M) -> OrmResult<DatabaseValue> {
        Ok(self
            .to_attributes(model)?
            .remove(&self.primary_key)
            .unwrap_or_default())
    }

    /// Build a model from column values; unmatched columns are ignored
    pub fn from_attributes<M: Model>(&self, attributes: &Attributes) -> OrmResult<M> {
        let mut model = M::default();
        self.assign(&mut model, attributes)?;
        Ok(model)
    }

    /// Overwrite the fields named by `attributes`, leaving every other field untouched
    pub fn assign<M: Model>(&self, model: &mut M, attributes: &Attributes) -> OrmResult<()> {
        let mut object = to_object(model)?;
        for (key, value) in attributes {
            if let Some(field) = self.field(key) {
                object.insert(field.name.clone(), coerce(field.kind, value));
            }
        }
        *model = from_object(object)?;
        Ok(())
    }

    pub fn set_field<M: Model>(&self, model: &mut M, name: &str, value: DatabaseValue) -> OrmResult<()> {
        let column = self
            .column(name)
            .ok_or_else(|| {
                OrmError::InvalidModel(format!("{} has no field '{}'", self.type_name, name))
            })?
            .to_string();
        let mut attributes = Attributes::new();
        attributes.insert(column, value);
        self.assign(model, &attributes)
    }

    /// Raw JSON of a relation slot
    pub fn relation_value<M: Model>(&self, model: &M, name: &str) -> OrmResult<JsonValue> {
        Ok(to_object(model)?.remove(name).unwrap_or(JsonValue::Null))
    }

    pub fn set_relation<M: Model>(&self, model: &mut M, name: &str, value: JsonValue) -> OrmResult<()> {
        let mut object = to_object(model)?;
        object.insert(name.to_string(), value);
        *model = from_object(object).map_err(|e| {
            OrmError::Relation(format!("cannot assign {}.{}: {}", self.type_name, name, e))
        })?;
        Ok(())
    }
}

fn to_object<M: Model>(model: &M) -> OrmResult<Map<String, JsonValue>> {
    match serde_json::to_value(model)? {
        JsonValue::Object(map) => Ok(map),
        _ => Err(OrmError::InvalidModel(
            "model must serialize to a map of fields".to_string(),
        )),
    }
}

fn from_object<M: Model>(object: Map<String, JsonValue>) -> OrmResult<M> {
    Ok(serde_json::from_value(JsonValue::Object(object))?)
}

fn kind_of(default: &JsonValue) -> FieldKind {
    match default {
        JsonValue::Bool(_) => FieldKind::Bool,
        JsonValue::Number(n) if n.is_i64() || n.is_u64() => FieldKind::Integer,
        JsonValue::Number(_) => FieldKind::Float,
        JsonValue::String(s) if DateTime::parse_from_rfc3339(s).is_ok() => FieldKind::Timestamp,
        JsonValue::String(_) => FieldKind::Text,
        JsonValue::Array(items) if items.is_empty() => FieldKind::Unknown,
        JsonValue::Array(items) if items.iter().all(|item| item.is_u64()) => FieldKind::Bytes,
        _ => FieldKind::Unknown,
    }
}

/// Drivers report booleans as integers and timestamps in several text forms
fn coerce(kind: FieldKind, value: &DatabaseValue) -> JsonValue {
    match (kind, value) {
        (FieldKind::Bool, DatabaseValue::Int64(i)) => JsonValue::Bool(*i != 0),
        (FieldKind::Bool, DatabaseValue::String(s)) => {
            JsonValue::Bool(matches!(s.as_str(), "1" | "t" | "true" | "TRUE"))
        }
        (FieldKind::Integer, DatabaseValue::String(s)) => s
            .parse::<i64>()
            .map(JsonValue::from)
            .unwrap_or_else(|_| value.to_json()),
        (FieldKind::Integer, DatabaseValue::Float64(f)) if f.fract() == 0.0 => {
            JsonValue::from(*f as i64)
        }
        (FieldKind::Text, DatabaseValue::Int64(i)) => JsonValue::String(i.to_string()),
        (FieldKind::Text, DatabaseValue::Float64(f)) => JsonValue::String(f.to_string()),
        (FieldKind::Timestamp | FieldKind::Unknown, DatabaseValue::String(s)) => {
            parse_loose_timestamp(s)
                .map(|dt| DatabaseValue::DateTime(dt).to_json())
                .unwrap_or_else(|| value.to_json())
        }
        _ => value.to_json(),
    }
}

fn parse_loose_timestamp(text: &str) -> Option<DateTime<Utc>> {
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
}

fn short_type_name(full: &str) -> String {
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
        .to_string()
}

/// `UserID` -> `user_id`, `HTTPServer` -> `http_server`, `blogPost` -> `blog_post`
pub fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                None | Some('_') => false,
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.map_or(false, |n| n.is_lowercase()),
                _ => false,
            };
            if boundary {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }

    out
}

fn pluralize(word: &str) -> String {
    if word.ends_with('s')
        || word.ends_with('x')
        || word.ends_with('z')
        || word.ends_with("ch")
        || word.ends_with("sh")
    {
        return format!("{}es", word);
    }
    if let Some(stem) = word.strip_suffix('y') {
        if !stem.ends_with(['a', 'e', 'i', 'o', 'u']) {
            return format!("{}ies", stem);
        }
    }
    format!("{}s", word)
}
