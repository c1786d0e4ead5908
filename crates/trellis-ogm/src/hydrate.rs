//! Read path: turn stored nodes into [`Document`]s following a field list.
//!
//! Without a selection only scalar fields are loaded. `*` adds eager
//! relationships one hop deep. Explicitly named fields are always loaded,
//! lazy relationships and counts included; nothing else is.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use trellis_core::{Document, EntityDescriptor, FieldList, Identity, QueryField, Registry, Result, Value};
use trellis_graph::{GraphTxn, NodeRecord};

pub(crate) fn identity_of(record: &NodeRecord) -> Identity {
    Identity {
        id: Some(record.id),
        uuid: record
            .properties
            .get("uuid")
            .and_then(Value::as_str)
            .map(str::to_string),
        loaded: None,
    }
}

/// Hydrate one node. Recursion goes through boxed futures, one per hop.
pub(crate) fn hydrate<'a, T: GraphTxn>(
    txn: &'a mut T,
    registry: &'a Registry,
    descriptor: Arc<EntityDescriptor>,
    record: NodeRecord,
    fields: &'a FieldList,
) -> BoxFuture<'a, Result<Document>> {
    async move {
        let selection = if fields.is_empty() {
            descriptor.default_fields()
        } else {
            fields.clone()
        };
        let everything = selection.includes_all();

        let mut document = Document::new(identity_of(&record), record.label.clone());

        let mut loaded = BTreeSet::new();
        let mut skipped = false;
        for field in descriptor.scalars() {
            if !everything && !selection.contains(&field.name) {
                skipped = true;
                continue;
            }
            loaded.insert(field.name.clone());
            if let Some(value) = record.properties.get(&field.property) {
                document.properties.insert(field.name.clone(), value.clone());
            }
        }
        if skipped {
            document.identity.loaded = Some(loaded);
        }

        for field in descriptor.counts() {
            let Some(rule) = field.relationship.as_ref().filter(|_| selection.contains(&field.name)) else {
                continue;
            };
            let total = txn.relationships(record.id, &rule.rel_type, rule.direction).await?.len();
            document.properties.insert(field.name.clone(), Value::Int(total as i64));
        }

        for field in descriptor.relationships() {
            let implicit;
            let query = match selection.get(&field.name) {
                Some(query) => query,
                None if everything && !field.is_lazy() => {
                    implicit = QueryField::new(&field.name);
                    &implicit
                }
                None => continue,
            };
            let (Some(rule), Some(target)) = (field.relationship.as_ref(), field.target(registry)) else {
                continue;
            };
            let target = target?;

            let edges = txn.relationships(record.id, &rule.rel_type, rule.direction).await?;
            let mut neighbours = Vec::with_capacity(edges.len());
            for edge in edges {
                let Some(node) = txn.node(edge.other(record.id)).await? else {
                    continue;
                };
                if rule.restrict_type && node.label != target.label {
                    continue;
                }
                neighbours.push((edge.properties, node));
            }

            let window = neighbours
                .into_iter()
                .skip(query.skip)
                .take(query.limit.unwrap_or(usize::MAX));
            let mut related = Vec::new();
            for (edge_properties, node) in window {
                let mut child = hydrate(&mut *txn, registry, target.clone(), node, &query.sub_fields).await?;
                if !edge_properties.is_empty() {
                    child.edge = Some(edge_properties);
                }
                related.push(child);
            }
            document.relations.insert(field.name.clone(), related);
        }

        Ok(document)
    }
    .boxed()
}
