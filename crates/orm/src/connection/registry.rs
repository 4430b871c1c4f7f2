//! Named connections with read/write splitting
//!
//! Connections open lazily on first use. Opening happens under one async mutex so
//! concurrent first callers share a single set of pools.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use rand::seq::SliceRandom;
use tokio::sync::Mutex;

use crate::backends::{Connector, DatabasePool, Dialect};
use crate::config::{self, ConfigProvider, ConnectionConfigs, FullConfig};
use crate::error::{OrmError, OrmResult};

/// Which side of a split connection a statement needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// The opened pools of one logical connection
pub struct Connection {
    configs: Arc<ConnectionConfigs>,
    writers: Vec<Arc<dyn DatabasePool>>,
    readers: Vec<Arc<dyn DatabasePool>>,
}

impl Connection {
    pub fn name(&self) -> &str {
        &self.configs.name
    }

    pub fn dialect(&self) -> Dialect {
        self.configs.dialect
    }

    pub fn config(&self) -> &FullConfig {
        self.configs.primary()
    }

    /// Pick a pool for the requested access. Reads without replicas use a writer.
    pub fn pool(&self, access: Access) -> Arc<dyn DatabasePool> {
        let mut rng = rand::thread_rng();
        let candidates = match access {
            Access::Read if !self.readers.is_empty() => &self.readers,
            _ => &self.writers,
        };
        // resolve() always yields at least one write target
        Arc::clone(candidates.choose(&mut rng).unwrap_or(&self.writers[0]))
    }

    async fn close(&self) {
        for pool in self.writers.iter().chain(self.readers.iter()) {
            if let Err(e) = pool.close().await {
                tracing::warn!(connection = %self.name(), "failed to close pool: {}", e);
            }
        }
    }
}

pub struct ConnectionRegistry {
    config: Arc<dyn ConfigProvider>,
    connector: Arc<dyn Connector>,
    resolved: DashMap<String, Arc<ConnectionConfigs>>,
    open: Mutex<HashMap<String, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new(config: Arc<dyn ConfigProvider>, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            resolved: DashMap::new(),
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &dyn ConfigProvider {
        self.config.as_ref()
    }

    pub fn default_name(&self) -> String {
        config::default_connection_name(self.config.as_ref())
    }

    /// Resolved configuration for a connection name, cached for the registry's lifetime
    pub fn resolve(&self, name: &str) -> OrmResult<Arc<ConnectionConfigs>> {
        let name = if name.is_empty() {
            self.default_name()
        } else {
            name.to_string()
        };

        if let Some(found) = self.resolved.get(&name) {
            return Ok(Arc::clone(found.value()));
        }

        let configs = Arc::new(config::resolve(self.config.as_ref(), &name)?);
        self.resolved.insert(name, Arc::clone(&configs));
        Ok(configs)
    }

    /// Open (or reuse) every pool of a connection
    pub async fn connection(&self, name: &str) -> OrmResult<Arc<Connection>> {
        let configs = self.resolve(name)?;

        let mut open = self.open.lock().await;
        if let Some(existing) = open.get(&configs.name) {
            return Ok(Arc::clone(existing));
        }

        let mut writers = Vec::with_capacity(configs.writes.len());
        for target in &configs.writes {
            writers.push(self.connector.connect(target).await?);
        }
        let mut readers = Vec::with_capacity(configs.reads.len());
        for target in &configs.reads {
            readers.push(self.connector.connect(target).await?);
        }

        if writers.is_empty() {
            return Err(OrmError::Configuration(format!(
                "connection '{}' has no write target",
                configs.name
            )));
        }

        tracing::info!(
            connection = %configs.name,
            writers = writers.len(),
            readers = readers.len(),
            "connection registered"
        );

        let connection = Arc::new(Connection {
            configs: Arc::clone(&configs),
            writers,
            readers,
        });
        open.insert(configs.name.clone(), Arc::clone(&connection));
        Ok(connection)
    }

    /// Close every opened pool and forget them
    pub async fn close_all(&self) {
        let drained: Vec<_> = self.open.lock().await.drain().collect();
        for (_, connection) in drained {
            connection.close().await;
        }
    }
}
