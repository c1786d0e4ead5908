//! Typed repository: save, remove, lookup and search for one entity type.

use std::marker::PhantomData;
use std::sync::Arc;

use trellis_core::entity::entity_ref;
use trellis_core::search::DEFAULT_LIMIT;
use trellis_core::{
    Entity, EntityDescriptor, Identity, NodeId, OgmError, Properties, Registry, Result,
};
use trellis_graph::GraphTxn;

use crate::save::{locate, now_millis, save_batch};
use crate::search::Search;
use crate::session::Session;

pub struct Repository<E: Entity> {
    registry: Arc<Registry>,
    descriptor: Arc<EntityDescriptor>,
    default_limit: usize,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            descriptor: self.descriptor.clone(),
            default_limit: self.default_limit,
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> Repository<E> {
    pub fn new(registry: Arc<Registry>) -> Result<Self> {
        let descriptor = registry.describe::<E>()?;
        Ok(Self {
            registry,
            descriptor,
            default_limit: DEFAULT_LIMIT,
            _entity: PhantomData,
        })
    }

    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit;
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    // ── Writes ───────────────────────────────────────────────────

    /// Save a batch inside the session's transaction. On success every entity
    /// carries its identity and its relationship slots are clean. On failure
    /// identities are restored and the session is marked rollback-only.
    pub async fn save<T: GraphTxn>(&self, session: &mut Session<T>, entities: &mut [E]) -> Result<()> {
        let snapshot: Vec<Identity> = entities.iter().map(|e| e.identity().clone()).collect();

        let result = match session.txn() {
            Ok(txn) => save_batch(&self.descriptor, txn, entities).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => {
                for entity in entities.iter_mut() {
                    for field in self.descriptor.relationships() {
                        if let Some(slot) = entity.relation_mut(&field.name) {
                            slot.mark_clean();
                        }
                    }
                }
                Ok(())
            }
            Err(err) => {
                for (entity, identity) in entities.iter_mut().zip(snapshot) {
                    *entity.identity_mut() = identity;
                }
                if session.is_active() {
                    session.mark_rollback_only();
                }
                err.report();
                Err(err)
            }
        }
    }

    pub async fn save_one<T: GraphTxn>(&self, session: &mut Session<T>, entity: &mut E) -> Result<()> {
        self.save(session, std::slice::from_mut(entity)).await
    }

    /// Delete the entity's node and every relationship touching it.
    /// Returns `false` when there was nothing stored to delete.
    pub async fn remove<T: GraphTxn>(&self, session: &mut Session<T>, entity: &mut E) -> Result<bool> {
        let txn = session.txn()?;
        let node = match entity.identity().id {
            Some(id) => txn.node(id).await?,
            None => locate(txn, self.descriptor.label, entity.identity()).await?,
        };
        let Some(node) = node else {
            return Ok(false);
        };
        txn.delete_node(node.id).await?;
        tracing::info!(entity = %entity_ref(entity), "Removed");
        *entity.identity_mut() = Identity::default();
        Ok(true)
    }

    /// Delete one scalar property from the stored node and clear it on the
    /// entity. Required fields cannot be removed.
    pub async fn remove_property<T: GraphTxn>(&self, session: &mut Session<T>, entity: &mut E, field: &str) -> Result<()> {
        let label = self.descriptor.label;
        let descriptor = self
            .descriptor
            .field(field)
            .filter(|f| f.is_scalar())
            .ok_or_else(|| OgmError::invalid_path(label, field))?;
        if descriptor.required {
            return Err(OgmError::MissingRequiredField {
                entity: label.to_string(),
                field: field.to_string(),
            });
        }

        let txn = session.txn()?;
        if let Some(node) = locate(txn, label, entity.identity()).await? {
            if node.properties.contains_key(&descriptor.property) {
                txn.remove_property(node.id, &descriptor.property).await?;
                txn.set_property(node.id, "last_modified", now_millis()).await?;
                tracing::debug!(entity = %entity_ref(entity), field, "Removed property");
            }
        }
        entity.set_property(field, None);
        Ok(())
    }

    /// Set properties on the edge behind a relationship field, creating the
    /// edge when it does not exist yet.
    pub async fn save_relationship<T: GraphTxn>(
        &self,
        session: &mut Session<T>,
        from: &E,
        field: &str,
        to: &Identity,
        properties: Properties,
    ) -> Result<()> {
        let rule = self
            .descriptor
            .field(field)
            .filter(|f| f.is_relationship())
            .and_then(|f| f.relationship.as_ref())
            .ok_or_else(|| OgmError::invalid_path(self.descriptor.label, field))?;
        let target_label = rule.target.as_ref().map_or(self.descriptor.label, |t| t.label);
        let not_persisted = || OgmError::RelatedNotPersisted {
            entity: self.descriptor.label.to_string(),
            field: field.to_string(),
        };

        let txn = session.txn()?;
        let source = locate(txn, self.descriptor.label, from.identity())
            .await?
            .ok_or_else(not_persisted)?
            .id;
        let target = locate(txn, target_label, to).await?.ok_or_else(not_persisted)?.id;

        let existing = txn
            .relationships(source, &rule.rel_type, rule.direction)
            .await?
            .into_iter()
            .find(|edge| edge.other(source) == target);
        match existing {
            Some(edge) => {
                for (key, value) in properties {
                    txn.set_relationship_property(edge.id, &key, value).await?;
                }
            }
            None => {
                let (start, end) = match rule.direction {
                    trellis_core::Direction::Incoming => (target, source),
                    _ => (source, target),
                };
                txn.create_relationship(start, end, &rule.rel_type, properties).await?;
            }
        }
        txn.set_property(source, "last_modified", now_millis()).await?;
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Start a search with this repository's default page size.
    pub fn search(&self) -> Search<E> {
        Search::new(self.clone(), self.default_limit)
    }

    pub async fn find_by_uuid<T: GraphTxn>(&self, session: &mut Session<T>, uuid: &str) -> Result<Option<E>> {
        self.search().uuids([uuid]).single(session).await
    }

    pub async fn find_by_id<T: GraphTxn>(&self, session: &mut Session<T>, id: NodeId) -> Result<Option<E>> {
        self.search().ids([id]).single(session).await
    }

    /// Load a lazy relationship into the entity within the session's transaction.
    pub async fn fetch<T: GraphTxn>(&self, session: &mut Session<T>, entity: &mut E, field: &str) -> Result<()> {
        crate::lazy::load(self, session, entity, field).await
    }
}

impl<E: Entity> std::fmt::Debug for Repository<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("entity", &self.descriptor.label)
            .field("default_limit", &self.default_limit)
            .finish()
    }
}
