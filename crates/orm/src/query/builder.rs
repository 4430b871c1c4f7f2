//! Query Builder - Core builder implementation
//!
//! A [`Query`] is a cheap handle: the engine, a connection name, an optional
//! transaction and an `Arc` of accumulated [`Conditions`]. Chain methods never
//! touch the receiver; they clone the conditions into a new query, so a base
//! query can be branched any number of times.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::backends::Dialect;
use crate::config::ConnectionConfigs;
use crate::error::{OrmError, OrmResult};
use crate::model::{schema_of, Model, ModelSchema};
use crate::observers::Hooks;
use crate::orm::OrmInner;
use crate::transaction::TxHandle;

use super::types::*;

/// Query builder bound to one connection
#[derive(Clone)]
pub struct Query {
    pub(crate) orm: Arc<OrmInner>,
    pub(crate) connection: String,
    pub(crate) conditions: Arc<Conditions>,
    pub(crate) tx: Option<Arc<TxHandle>>,
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("connection", &self.connection)
            .field("in_transaction", &self.tx.is_some())
            .field("conditions", &self.conditions)
            .finish()
    }
}

impl Query {
    pub(crate) fn new(orm: Arc<OrmInner>, connection: &str) -> Self {
        let connection = if connection.is_empty() {
            orm.registry.default_name()
        } else {
            connection.to_string()
        };
        Self {
            orm,
            connection,
            conditions: Arc::new(Conditions::default()),
            tx: None,
        }
    }

    /// Same connection and transaction, nothing accumulated
    pub fn fresh(&self) -> Query {
        Query {
            orm: Arc::clone(&self.orm),
            connection: self.connection.clone(),
            conditions: Arc::new(Conditions::default()),
            tx: self.tx.clone(),
        }
    }

    /// Copy-on-write step shared by every chain method
    pub(crate) fn derive(&self, change: impl FnOnce(&mut Conditions)) -> Query {
        let mut conditions = (*self.conditions).clone();
        change(&mut conditions);
        Query {
            orm: Arc::clone(&self.orm),
            connection: self.connection.clone(),
            conditions: Arc::new(conditions),
            tx: self.tx.clone(),
        }
    }

    pub fn conditions(&self) -> &Conditions {
        &self.conditions
    }

    pub fn connection_name(&self) -> &str {
        &self.connection
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// Target an explicit table instead of the model's table
    pub fn table(&self, name: &str) -> Query {
        let name = name.to_string();
        self.derive(|c| c.table = Some(name))
    }

    /// Bind a model instance; updates and deletes use its primary key and fire its hooks
    pub fn model<M: Model>(&self, model: &M) -> Query {
        let model = model.clone();
        self.derive(|c| c.model = Some(Arc::new(model)))
    }

    /// Deadline for every statement this query issues
    pub fn with_timeout(&self, timeout: Duration) -> Query {
        self.derive(|c| c.timeout = Some(timeout))
    }

    /// Apply reusable query fragments in order
    pub fn scopes(&self, scopes: &[fn(Query) -> Query]) -> Query {
        scopes.iter().fold(self.clone(), |query, scope| scope(query))
    }

    /// Run `M`'s statements on the connection `M` declares, if any
    pub(crate) fn bind_for<M: Model>(&self) -> OrmResult<Query> {
        match M::connection().filter(|name| !name.is_empty()) {
            Some(name) if name != self.connection => {
                if self.tx.is_some() {
                    return Err(OrmError::Transaction(format!(
                        "model bound to connection '{}' cannot join a transaction on '{}'",
                        name, self.connection
                    )));
                }
                Ok(Query {
                    connection: name.to_string(),
                    ..self.clone()
                })
            }
            _ => Ok(self.clone()),
        }
    }

    pub(crate) fn configs(&self) -> OrmResult<Arc<ConnectionConfigs>> {
        self.orm.registry.resolve(&self.connection)
    }

    pub(crate) fn dialect(&self) -> OrmResult<Dialect> {
        Ok(self.configs()?.dialect)
    }

    /// Schema of `M` and the table it maps to on this connection
    pub(crate) fn target<M: Model>(&self) -> OrmResult<(Arc<ModelSchema>, String)> {
        let schema = schema_of::<M>()?;
        let table = match &self.conditions.table {
            Some(table) => table.clone(),
            None => schema.table(self.configs()?.primary()),
        };
        Ok((schema, table))
    }

    /// The instance bound with [`Query::model`], if it is an `M`
    pub(crate) fn bound_model<M: Model>(&self) -> Option<M> {
        self.conditions
            .model
            .as_ref()
            .and_then(|model| model.downcast_ref::<M>())
            .cloned()
    }

    pub(crate) fn hooks<M: Model>(&self) -> Hooks<M> {
        if self.conditions.without_events {
            Hooks::none()
        } else {
            self.orm.observers.hooks_for::<M>()
        }
    }

    /// Terminal-operation checks on the accumulated state
    pub(crate) fn validate(&self) -> OrmResult<()> {
        let c = &self.conditions;
        if !c.selects.is_empty() && !c.omits.is_empty() {
            return Err(OrmError::SelectOmitConflict);
        }
        for names in [&c.selects, &c.omits] {
            if names.len() > 1 && names.iter().any(|name| name == ASSOCIATIONS) {
                return Err(OrmError::AssociationsConflict);
            }
        }
        Ok(())
    }

    pub(crate) fn cascades_associations(&self) -> bool {
        self.conditions.selects.iter().any(|name| name == ASSOCIATIONS)
    }
}
