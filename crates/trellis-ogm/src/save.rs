//! Save orchestration.
//!
//! A batch is written in dependency order: every node first, then the
//! relationships between them. Validation (required and unique fields) runs
//! for the whole batch before anything is written. The caller's session is
//! the atomicity boundary; on failure the repository marks it rollback-only.

use chrono::Utc;

use trellis_core::entity::entity_ref;
use trellis_core::{
    Cardinality, Direction, Entity, EntityDescriptor, HasRequiredFields, Identity, NodeId, OgmError, Properties,
    Result, Value,
};
use trellis_graph::{GraphError, GraphTxn, NodeQuery, NodeRecord};

/// Per-entity state of one save invocation.
struct SaveContext {
    index: usize,
    create: bool,
    stored: Option<NodeId>,
    /// Changed scalar values keyed by store property.
    sets: Vec<(String, Value)>,
    removals: Vec<String>,
}

pub(crate) fn now_millis() -> Value {
    Value::Int(Utc::now().timestamp_millis())
}

/// The stored node an identity refers to, if any.
pub(crate) async fn locate<T: GraphTxn>(txn: &mut T, label: &str, identity: &Identity) -> Result<Option<NodeRecord>> {
    if let Some(id) = identity.id {
        return match txn.node(id).await? {
            Some(node) => Ok(Some(node)),
            None => Err(GraphError::NotFound { kind: "node", id: id.0 }.into()),
        };
    }
    match &identity.uuid {
        Some(uuid) => {
            let query = NodeQuery::label(label).where_eq("uuid", uuid.as_str()).window(0, Some(1));
            Ok(txn.find(&query).await?.into_iter().next())
        }
        None => Ok(None),
    }
}

/// Record a unique value for this batch. `false` if another entity of the
/// batch already holds it.
fn claim(claimed: &mut Vec<(String, Value)>, property: &str, value: &Value) -> bool {
    if claimed.iter().any(|(p, v)| p == property && v == value) {
        return false;
    }
    claimed.push((property.to_string(), value.clone()));
    true
}

/// Internal id of a relationship target, or `None` if it is not stored.
async fn resolve_target<T: GraphTxn>(txn: &mut T, label: &str, identity: &Identity) -> Result<Option<NodeId>> {
    if let Some(id) = identity.id {
        return Ok(txn.node(id).await?.map(|n| n.id));
    }
    match &identity.uuid {
        Some(uuid) => {
            let query = NodeQuery::label(label).where_eq("uuid", uuid.as_str()).window(0, Some(1));
            Ok(txn.find(&query).await?.first().map(|n| n.id))
        }
        None => Ok(None),
    }
}

pub(crate) async fn save_batch<E: Entity, T: GraphTxn>(
    descriptor: &EntityDescriptor,
    txn: &mut T,
    entities: &mut [E],
) -> Result<()> {
    let label = descriptor.label;

    // ── Changes ──────────────────────────────────────────────────
    let mut contexts = Vec::with_capacity(entities.len());
    for (index, entity) in entities.iter_mut().enumerate() {
        let stored = locate(txn, label, entity.identity()).await?;
        let identity = entity.identity_mut();
        match &stored {
            Some(node) => {
                identity.id = Some(node.id);
                if identity.uuid.is_none() {
                    identity.uuid = node.properties.get("uuid").and_then(Value::as_str).map(str::to_string);
                }
            }
            None => {
                if identity.uuid.is_none() {
                    identity.uuid = Some(Identity::generate_uuid());
                }
            }
        }

        let mut sets = Vec::new();
        let mut removals = Vec::new();
        for field in descriptor.scalars() {
            let previous = stored.as_ref().and_then(|n| n.properties.get(&field.property));
            match entity.property(&field.name) {
                Some(value) if previous != Some(&value) => sets.push((field.property.clone(), value)),
                Some(_) => {}
                None if field.null_remove && previous.is_some() && entity.identity().is_loaded(&field.name) => {
                    removals.push(field.property.clone())
                }
                None => {}
            }
        }

        contexts.push(SaveContext {
            index,
            create: stored.is_none(),
            stored: stored.map(|n| n.id),
            sets,
            removals,
        });
    }

    // ── Required fields ──────────────────────────────────────────
    for ctx in &contexts {
        let entity = &entities[ctx.index];
        let missing = if ctx.create {
            entity.missing_required(descriptor)
        } else {
            descriptor
                .required_fields()
                .filter(|f| f.is_scalar())
                .find(|f| match entity.property(&f.name) {
                    Some(value) => value.is_blank(),
                    None => f.null_remove && entity.identity().is_loaded(&f.name),
                })
                .map(|f| f.name.clone())
        };
        if let Some(field) = missing {
            return Err(OgmError::MissingRequiredField {
                entity: label.to_string(),
                field,
            });
        }
    }

    // ── Unique fields ────────────────────────────────────────────
    let mut claimed = Vec::new();
    for ctx in &contexts {
        for field in descriptor.unique_fields() {
            let Some((_, value)) = ctx.sets.iter().find(|(p, _)| *p == field.property) else {
                continue;
            };
            let duplicate = || OgmError::DuplicateEntry {
                entity: label.to_string(),
                field: field.name.clone(),
                value: value.to_string(),
            };
            if !claim(&mut claimed, &field.property, value) {
                return Err(duplicate());
            }
            let query = NodeQuery::label(label).where_eq(&field.property, value.clone());
            let taken = txn.find(&query).await?.iter().any(|n| Some(n.id) != ctx.stored);
            if taken {
                return Err(duplicate());
            }
        }
    }

    // ── Nodes ────────────────────────────────────────────────────
    let now = now_millis();
    for ctx in &contexts {
        let entity = &mut entities[ctx.index];
        if ctx.create {
            let mut properties: Properties = ctx.sets.iter().cloned().collect();
            if let Some(uuid) = &entity.identity().uuid {
                properties.insert("uuid".to_string(), Value::from(uuid.as_str()));
            }
            properties.insert("type".to_string(), Value::from(label));
            properties.insert("created".to_string(), now.clone());
            properties.insert("last_modified".to_string(), now.clone());
            let id = txn.create_node(label, properties).await?;
            entity.identity_mut().id = Some(id);
            tracing::info!(entity = %entity_ref(entity), "Created");
        } else if !ctx.sets.is_empty() || !ctx.removals.is_empty() {
            let Some(id) = ctx.stored else {
                return Err(OgmError::Internal(format!("{} has no stored node", entity_ref(entity))));
            };
            for (property, value) in &ctx.sets {
                txn.set_property(id, property, value.clone()).await?;
            }
            for property in &ctx.removals {
                txn.remove_property(id, property).await?;
            }
            txn.set_property(id, "last_modified", now.clone()).await?;
            tracing::info!(
                entity = %entity_ref(entity),
                changed = ctx.sets.len() + ctx.removals.len(),
                "Updated"
            );
        }
    }

    // ── Relationships ────────────────────────────────────────────
    for ctx in &contexts {
        let Some(source) = entities[ctx.index].identity().id else {
            return Err(OgmError::Internal(format!("{} was not written", entity_ref(&entities[ctx.index]))));
        };
        for field in descriptor.relationships() {
            let Some(rule) = field.relationship.as_ref() else {
                continue;
            };
            let Some(pending) = entities[ctx.index].relation(&field.name).and_then(|slot| slot.pending()) else {
                continue;
            };
            let target_label = rule.target.as_ref().map_or(label, |t| t.label);

            let mut desired: Vec<NodeId> = Vec::with_capacity(pending.targets.len());
            for target in &pending.targets {
                let id = resolve_target(txn, target_label, target)
                    .await?
                    .ok_or_else(|| OgmError::RelatedNotPersisted {
                        entity: label.to_string(),
                        field: field.name.clone(),
                    })?;
                if !desired.contains(&id) {
                    desired.push(id);
                }
            }
            if rule.cardinality == Cardinality::Single && desired.len() > 1 {
                desired.drain(..desired.len() - 1);
            }
            let replace = pending.replace || rule.cardinality == Cardinality::Single;

            let mut linked = Vec::new();
            let mut removed = 0usize;
            for edge in txn.relationships(source, &rule.rel_type, rule.direction).await? {
                let other = edge.other(source);
                if desired.contains(&other) && !linked.contains(&other) {
                    linked.push(other);
                } else if replace {
                    txn.delete_relationship(edge.id).await?;
                    removed += 1;
                }
            }

            let mut added = 0usize;
            for target in desired.into_iter().filter(|t| !linked.contains(t)) {
                let (start, end) = match rule.direction {
                    Direction::Incoming => (target, source),
                    Direction::Outgoing | Direction::Both => (source, target),
                };
                txn.create_relationship(start, end, &rule.rel_type, Properties::new()).await?;
                added += 1;
            }

            if added > 0 || removed > 0 {
                tracing::debug!(
                    entity = %entity_ref(&entities[ctx.index]),
                    field = %field.name,
                    added,
                    removed,
                    "Wrote relationships"
                );
            }
        }
    }

    Ok(())
}
