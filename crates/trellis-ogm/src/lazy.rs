//! Deferred loading of relationship fields.
//!
//! A lazy field stays unloaded until it is fetched. The fetch runs inside the
//! caller's session and never opens a transaction of its own; the result is
//! cached in the entity's slot and later fetches reuse it.

use trellis_core::{Entity, FieldList, OgmError, QueryField, Result};
use trellis_graph::GraphTxn;

use crate::hydrate::hydrate;
use crate::repository::Repository;
use crate::session::Session;

pub(crate) async fn load<E: Entity, T: GraphTxn>(
    repository: &Repository<E>,
    session: &mut Session<T>,
    entity: &mut E,
    field: &str,
) -> Result<()> {
    let descriptor = repository.descriptor().clone();
    if !descriptor.field(field).is_some_and(|f| f.is_relationship()) {
        return Err(OgmError::invalid_path(descriptor.label, field));
    }
    let cached = entity
        .relation(field)
        .ok_or_else(|| OgmError::metadata(descriptor.label, format!("no relation slot for \"{field}\"")))?
        .is_loaded();
    if cached {
        return Ok(());
    }

    let txn = session.txn()?;
    let record = match entity.identity().id {
        Some(id) => txn.node(id).await?,
        None => None,
    };

    let related = match record {
        Some(record) => {
            let selection = FieldList::from_fields([QueryField::new(field)]);
            let mut document = hydrate(txn, repository.registry(), descriptor.clone(), record, &selection).await?;
            document.relations.remove(field).unwrap_or_default()
        }
        None => Vec::new(),
    };

    tracing::debug!(entity = descriptor.label, field, loaded = related.len(), "Loaded lazy relationship");
    if let Some(slot) = entity.relation_mut(field) {
        slot.fill(&related);
    }
    Ok(())
}
