//! The engine: connections, observers and the query logger shared by every query

use std::future::Future;
use std::sync::Arc;

use crate::backends::{Connector, SqlxConnector};
use crate::config::ConfigProvider;
use crate::connection::ConnectionRegistry;
use crate::error::OrmResult;
use crate::events::ModelObserver;
use crate::logging::QueryLogger;
use crate::model::Model;
use crate::observers::ObserverRegistry;
use crate::query::Query;
use crate::transaction::{Transaction, TransactionConfig};

pub(crate) struct OrmInner {
    pub(crate) registry: ConnectionRegistry,
    pub(crate) observers: ObserverRegistry,
    pub(crate) logger: QueryLogger,
}

/// Entry point. Cheap to clone; clones share connections and observers.
#[derive(Clone)]
pub struct Orm {
    inner: Arc<OrmInner>,
}

impl std::fmt::Debug for Orm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orm")
            .field("default_connection", &self.inner.registry.default_name())
            .field("slow_threshold", &self.inner.logger.slow_threshold())
            .finish()
    }
}

impl Orm {
    /// Engine backed by sqlx drivers
    pub fn new(config: impl ConfigProvider + 'static) -> Self {
        Self::with_connector(config, SqlxConnector::new())
    }

    /// Engine with a custom driver factory
    pub fn with_connector(
        config: impl ConfigProvider + 'static,
        connector: impl Connector + 'static,
    ) -> Self {
        let config: Arc<dyn ConfigProvider> = Arc::new(config);
        let logger = QueryLogger::from_config(config.as_ref());
        tracing::debug!(
            default_connection = %crate::config::default_connection_name(config.as_ref()),
            slow_threshold = ?logger.slow_threshold(),
            "orm initialized"
        );
        Self {
            inner: Arc::new(OrmInner {
                registry: ConnectionRegistry::new(config, Arc::new(connector)),
                observers: ObserverRegistry::new(),
                logger,
            }),
        }
    }

    pub fn config(&self) -> &dyn ConfigProvider {
        self.inner.registry.config()
    }

    /// Register an observer for `M`. Ignored while `M` declares its own observer.
    pub fn observe<M: Model>(&self, observer: impl ModelObserver<M> + 'static) {
        self.inner.observers.register::<M>(Arc::new(observer));
    }

    /// A query on the default connection
    pub fn query(&self) -> Query {
        Query::new(Arc::clone(&self.inner), "")
    }

    /// A query on a named connection
    pub fn connection(&self, name: &str) -> Query {
        Query::new(Arc::clone(&self.inner), name)
    }

    pub async fn begin(&self) -> OrmResult<Transaction> {
        self.query().begin().await
    }

    pub async fn begin_with(&self, config: TransactionConfig) -> OrmResult<Transaction> {
        self.query().begin_with(config).await
    }

    /// See [`Query::transaction`]
    pub async fn transaction<F, Fut, T>(&self, work: F) -> OrmResult<T>
    where
        F: FnOnce(Query) -> Fut,
        Fut: Future<Output = OrmResult<T>>,
    {
        self.query().transaction(work).await
    }

    /// Close every opened pool
    pub async fn close(&self) {
        self.inner.registry.close_all().await;
    }
}
