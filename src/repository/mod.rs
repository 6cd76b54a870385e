//! Typed repository over the single-table layout
//!
//! Every entity type shares one physical table. Items live at
//! `(<ENTITY_TYPE>#<scope>, <id>)`, so a scope such as a tenant or an owner
//! partitions the entities of one type.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;
use tokio::time::timeout;

use crate::config::RepositoryConfig;
use crate::engine::{DynamoEngine, Engine};
use crate::envelope::TTL_ATTRIBUTE;
use crate::error::Error;
use crate::keys::{validate_entity, Entity};
use crate::schema::{enable_expiry, ensure_table, TableSchema};

mod crud;
mod finder;

/// Partitioned repository for entities of type `T`
///
/// # Example
///
/// ```rust,no_run
/// use dynamo_repository::{DynamoEngine, Entity, Error, Filter, Repository, RepositoryConfig};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Order {
///     id: String,
///     status: String,
/// }
///
/// impl Entity for Order {
///     const ENTITY_TYPE: &'static str = "Order";
///
///     fn id(&self) -> String {
///         self.id.clone()
///     }
/// }
///
/// #[tokio::main]
/// async fn main() -> Result<(), Error> {
///     let engine = DynamoEngine::from_env().await;
///     let orders: Repository<Order> =
///         Repository::new(engine, RepositoryConfig::from_env()?).await?;
///
///     let order = Order { id: "o-1".into(), status: "open".into() };
///     orders.save(&order, "tenant-1").await?;
///
///     let open = orders.find_by(Filter::eq("status", "open"), "tenant-1").await?;
///     assert_eq!(open.len(), 1);
///     Ok(())
/// }
/// ```
pub struct Repository<T, E = DynamoEngine> {
    engine: E,
    config: RepositoryConfig,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity, E: Engine> Repository<T, E> {
    /// Build a repository, provisioning the table unless configured not to
    ///
    /// Provisioning failures come back as [`Error::Provisioning`]; the caller should
    /// treat them as fatal and not serve requests.
    pub async fn new(engine: E, config: RepositoryConfig) -> Result<Self, Error> {
        config.validate()?;
        validate_entity::<T>()?;

        let repository = Self {
            engine,
            config,
            _entity: PhantomData,
        };

        if repository.config.skip_table_creation {
            tracing::debug!(table = %repository.config.table_name, "Skipping table provisioning");
        } else if let Err(source) = repository.provision().await {
            tracing::error!(table = %repository.config.table_name, error = %source, "Table provisioning failed");
            return Err(Error::Provisioning {
                table: repository.config.table_name.clone(),
                source: Box::new(source),
            });
        }

        Ok(repository)
    }

    async fn provision(&self) -> Result<(), Error> {
        let limit = self.config.timeouts.provisioning;
        let schema = TableSchema::for_table(&self.config.table_name);
        ensure_table(&self.engine, &schema, limit).await?;

        if self.config.ttl.is_some() {
            enable_expiry(&self.engine, &self.config.table_name, TTL_ATTRIBUTE, limit).await?;
        }
        Ok(())
    }

    /// Repository configuration
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Underlying storage engine
    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub(crate) fn table(&self) -> &str {
        &self.config.table_name
    }

    pub(crate) async fn bounded<F, O>(
        &self,
        operation: &'static str,
        limit: Duration,
        future: F,
    ) -> Result<O, Error>
    where
        F: Future<Output = Result<O, Error>>,
    {
        match timeout(limit, future).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(table = %self.table(), operation, ?limit, "Operation timed out");
                Err(Error::Timeout {
                    operation,
                    after: limit,
                })
            }
        }
    }
}

impl<T, E: Clone> Clone for Repository<T, E> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            config: self.config.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T, E: fmt::Debug> fmt::Debug for Repository<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("entity", &std::any::type_name::<T>())
            .field("engine", &self.engine)
            .field("config", &self.config)
            .finish()
    }
}
