//! Entry point binding a graph store, the metadata registry and configuration.

use std::sync::Arc;

use trellis_core::config::TrellisConfig;
use trellis_core::{Entity, EntityDescriptor, Registry, Result};
use trellis_graph::{GraphStore, GraphTxn};

use crate::repository::Repository;
use crate::session::Session;

/// Shared handle over one graph store. Clone is cheap.
#[derive(Clone)]
pub struct Mapper<S: GraphStore> {
    store: S,
    registry: Arc<Registry>,
    config: TrellisConfig,
}

impl<S: GraphStore> Mapper<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, TrellisConfig::default())
    }

    pub fn with_config(store: S, config: TrellisConfig) -> Self {
        Self {
            store,
            registry: Registry::shared(),
            config,
        }
    }

    /// Use a private registry instead of the process-wide one.
    pub fn with_registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &TrellisConfig {
        &self.config
    }

    /// Open a new transaction scope.
    pub async fn session(&self) -> Result<Session<S::Txn>> {
        Session::begin(&self.store).await
    }

    pub fn describe<E: Entity>(&self) -> Result<Arc<EntityDescriptor>> {
        self.registry.describe::<E>()
    }

    pub fn repository<E: Entity>(&self) -> Result<Repository<E>> {
        Ok(Repository::new(self.registry.clone())?.with_default_limit(self.config.default_page_size))
    }

    /// Declare indexes and unique constraints for every described entity.
    pub async fn ensure_schema(&self) -> Result<usize> {
        let mut session = self.session().await?;
        let created = ensure_indexes(&self.registry, &mut session).await?;
        session.commit().await?;
        Ok(created)
    }
}

/// Declare indexes inside an existing session. Returns how many were declared.
pub async fn ensure_indexes<T: GraphTxn>(registry: &Registry, session: &mut Session<T>) -> Result<usize> {
    let txn = session.txn()?;
    let mut declared = 0;
    for descriptor in registry.entity_types() {
        txn.ensure_index(descriptor.label, "uuid", true).await?;
        declared += 1;
        for field in descriptor.scalars().filter(|f| f.unique || f.indexed) {
            txn.ensure_index(descriptor.label, &field.property, field.unique).await?;
            declared += 1;
        }
        tracing::info!(entity = descriptor.label, "Ensured indexes");
    }
    Ok(declared)
}
