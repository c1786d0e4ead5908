//! Embedded in-process graph store.
//!
//! Nodes and relationships live in id-keyed maps. A transaction works on a
//! snapshot taken at `begin` and records every write in a log; `commit`
//! replays the log onto the shared graph under one write lock, checking
//! unique constraints first, so a transaction lands entirely or not at all.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use trellis_core::{Direction, NodeId, Properties, RelId, SortOrder, Value};

use crate::client::GraphError;
use crate::store::{Condition, GraphStore, GraphTxn, NodeQuery, NodeRecord, RelationshipRecord};

#[derive(Debug, Clone)]
struct StoredNode {
    label: String,
    properties: Properties,
}

#[derive(Debug, Clone)]
struct StoredRel {
    rel_type: String,
    start: NodeId,
    end: NodeId,
    properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct IndexDef {
    label: String,
    property: String,
    unique: bool,
}

#[derive(Debug, Clone, Default)]
struct GraphState {
    nodes: BTreeMap<NodeId, StoredNode>,
    relationships: BTreeMap<RelId, StoredRel>,
    indexes: BTreeSet<IndexDef>,
}

#[derive(Debug, Clone)]
enum WriteOp {
    CreateNode(NodeId, StoredNode),
    SetProperty(NodeId, String, Value),
    RemoveProperty(NodeId, String),
    DeleteNode(NodeId),
    CreateRel(RelId, StoredRel),
    SetRelProperty(RelId, String, Value),
    RemoveRelProperty(RelId, String),
    DeleteRel(RelId),
    Index(IndexDef),
}

impl GraphState {
    fn apply(&mut self, op: WriteOp) {
        match op {
            WriteOp::CreateNode(id, node) => {
                self.nodes.insert(id, node);
            }
            WriteOp::SetProperty(id, key, value) => {
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.properties.insert(key, value);
                }
            }
            WriteOp::RemoveProperty(id, key) => {
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.properties.remove(&key);
                }
            }
            WriteOp::DeleteNode(id) => {
                self.nodes.remove(&id);
                self.relationships.retain(|_, rel| rel.start != id && rel.end != id);
            }
            WriteOp::CreateRel(id, rel) => {
                if self.nodes.contains_key(&rel.start) && self.nodes.contains_key(&rel.end) {
                    self.relationships.insert(id, rel);
                }
            }
            WriteOp::SetRelProperty(id, key, value) => {
                if let Some(rel) = self.relationships.get_mut(&id) {
                    rel.properties.insert(key, value);
                }
            }
            WriteOp::RemoveRelProperty(id, key) => {
                if let Some(rel) = self.relationships.get_mut(&id) {
                    rel.properties.remove(&key);
                }
            }
            WriteOp::DeleteRel(id) => {
                self.relationships.remove(&id);
            }
            WriteOp::Index(def) => {
                self.indexes.insert(def);
            }
        }
    }

    fn node_record(&self, id: NodeId) -> Option<NodeRecord> {
        self.nodes.get(&id).map(|node| NodeRecord {
            id,
            label: node.label.clone(),
            properties: node.properties.clone(),
        })
    }

    fn touches(rel: &StoredRel, node: NodeId, direction: Direction) -> bool {
        match direction {
            Direction::Outgoing => rel.start == node,
            Direction::Incoming => rel.end == node,
            Direction::Both => rel.start == node || rel.end == node,
        }
    }

    fn relationships_of(&self, node: NodeId, rel_type: &str, direction: Direction) -> Vec<RelationshipRecord> {
        self.relationships
            .iter()
            .filter(|(_, rel)| rel.rel_type == rel_type && Self::touches(rel, node, direction))
            .map(|(id, rel)| RelationshipRecord {
                id: *id,
                rel_type: rel.rel_type.clone(),
                start: rel.start,
                end: rel.end,
                properties: rel.properties.clone(),
            })
            .collect()
    }

    fn matches(&self, id: NodeId, node: &StoredNode, condition: &Condition) -> bool {
        match condition {
            Condition::Property { key, op } => op.matches(node.properties.get(key)),
            Condition::PropertyIn { key, values } => node
                .properties
                .get(key)
                .is_some_and(|v| values.contains(v)),
            Condition::IdIn(ids) => ids.contains(&id),
            Condition::Related {
                rel_type,
                direction,
                target_label,
                key,
                op,
            } => self
                .relationships_of(id, rel_type, *direction)
                .iter()
                .filter_map(|rel| self.nodes.get(&rel.other(id)))
                .filter(|other| target_label.as_ref().map_or(true, |l| &other.label == l))
                .any(|other| op.matches(other.properties.get(key))),
        }
    }

    fn find(&self, query: &NodeQuery) -> Vec<NodeRecord> {
        let mut found: Vec<NodeRecord> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.label == query.label)
            .filter(|(id, node)| query.conditions.iter().all(|c| self.matches(**id, node, c)))
            .map(|(id, node)| NodeRecord {
                id: *id,
                label: node.label.clone(),
                properties: node.properties.clone(),
            })
            .collect();

        if !query.order_by.is_empty() {
            found.sort_by(|a, b| {
                for (key, order) in &query.order_by {
                    let ordering = match (a.properties.get(key), b.properties.get(key)) {
                        (Some(x), Some(y)) => x.compare(y).unwrap_or(std::cmp::Ordering::Equal),
                        (Some(_), None) => std::cmp::Ordering::Less,
                        (None, Some(_)) => std::cmp::Ordering::Greater,
                        (None, None) => std::cmp::Ordering::Equal,
                    };
                    let ordering = match order {
                        SortOrder::Asc => ordering,
                        SortOrder::Desc => ordering.reverse(),
                    };
                    if ordering.is_ne() {
                        return ordering;
                    }
                }
                a.id.cmp(&b.id)
            });
        }

        found
            .into_iter()
            .skip(query.skip)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect()
    }

    /// First unique constraint violated by the current state.
    fn constraint_violation(&self) -> Option<GraphError> {
        for index in self.indexes.iter().filter(|i| i.unique) {
            let mut seen = BTreeSet::new();
            for node in self.nodes.values().filter(|n| n.label == index.label) {
                if let Some(value) = node.properties.get(&index.property) {
                    if !seen.insert(value.to_string()) {
                        return Some(GraphError::Constraint(format!(
                            "{}.{} = {value} is not unique",
                            index.label, index.property
                        )));
                    }
                }
            }
        }
        None
    }
}

struct Shared {
    state: RwLock<GraphState>,
    next_node: AtomicI64,
    next_rel: AtomicI64,
}

/// In-process graph store. Clones share the same graph.
#[derive(Clone)]
pub struct MemoryGraph {
    shared: Arc<Shared>,
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(GraphState::default()),
                next_node: AtomicI64::new(0),
                next_rel: AtomicI64::new(0),
            }),
        }
    }

    pub fn node_count(&self) -> usize {
        self.shared.state.read().nodes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.shared.state.read().relationships.len()
    }

    /// Declared indexes as `(label, property, unique)`.
    pub fn indexes(&self) -> Vec<(String, String, bool)> {
        self.shared
            .state
            .read()
            .indexes
            .iter()
            .map(|i| (i.label.clone(), i.property.clone(), i.unique))
            .collect()
    }
}

impl std::fmt::Debug for MemoryGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.read();
        f.debug_struct("MemoryGraph")
            .field("nodes", &state.nodes.len())
            .field("relationships", &state.relationships.len())
            .finish()
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    type Txn = MemoryTxn;

    async fn begin(&self) -> Result<MemoryTxn, GraphError> {
        Ok(MemoryTxn {
            shared: self.shared.clone(),
            view: self.shared.state.read().clone(),
            log: Vec::new(),
            finished: false,
        })
    }
}

/// Snapshot transaction over a [`MemoryGraph`].
pub struct MemoryTxn {
    shared: Arc<Shared>,
    view: GraphState,
    log: Vec<WriteOp>,
    finished: bool,
}

impl std::fmt::Debug for MemoryTxn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTxn")
            .field("pending", &self.log.len())
            .field("finished", &self.finished)
            .finish()
    }
}

impl MemoryTxn {
    fn write(&mut self, op: WriteOp) {
        self.view.apply(op.clone());
        self.log.push(op);
    }

    fn existing_node(&self, id: NodeId) -> Result<(), GraphError> {
        if self.view.nodes.contains_key(&id) {
            Ok(())
        } else {
            Err(GraphError::NotFound {
                kind: "node",
                id: id.0,
            })
        }
    }

    fn existing_rel(&self, id: RelId) -> Result<(), GraphError> {
        if self.view.relationships.contains_key(&id) {
            Ok(())
        } else {
            Err(GraphError::NotFound {
                kind: "relationship",
                id: id.0,
            })
        }
    }
}

#[async_trait]
impl GraphTxn for MemoryTxn {
    async fn create_node(&mut self, label: &str, properties: Properties) -> Result<NodeId, GraphError> {
        let id = NodeId(self.shared.next_node.fetch_add(1, Ordering::SeqCst));
        self.write(WriteOp::CreateNode(
            id,
            StoredNode {
                label: label.to_string(),
                properties,
            },
        ));
        Ok(id)
    }

    async fn node(&mut self, id: NodeId) -> Result<Option<NodeRecord>, GraphError> {
        Ok(self.view.node_record(id))
    }

    async fn set_property(&mut self, id: NodeId, key: &str, value: Value) -> Result<(), GraphError> {
        self.existing_node(id)?;
        self.write(WriteOp::SetProperty(id, key.to_string(), value));
        Ok(())
    }

    async fn remove_property(&mut self, id: NodeId, key: &str) -> Result<(), GraphError> {
        self.existing_node(id)?;
        self.write(WriteOp::RemoveProperty(id, key.to_string()));
        Ok(())
    }

    async fn delete_node(&mut self, id: NodeId) -> Result<(), GraphError> {
        self.existing_node(id)?;
        self.write(WriteOp::DeleteNode(id));
        Ok(())
    }

    async fn create_relationship(
        &mut self,
        start: NodeId,
        end: NodeId,
        rel_type: &str,
        properties: Properties,
    ) -> Result<RelId, GraphError> {
        self.existing_node(start)?;
        self.existing_node(end)?;
        let id = RelId(self.shared.next_rel.fetch_add(1, Ordering::SeqCst));
        self.write(WriteOp::CreateRel(
            id,
            StoredRel {
                rel_type: rel_type.to_string(),
                start,
                end,
                properties,
            },
        ));
        Ok(id)
    }

    async fn set_relationship_property(&mut self, id: RelId, key: &str, value: Value) -> Result<(), GraphError> {
        self.existing_rel(id)?;
        self.write(WriteOp::SetRelProperty(id, key.to_string(), value));
        Ok(())
    }

    async fn remove_relationship_property(&mut self, id: RelId, key: &str) -> Result<(), GraphError> {
        self.existing_rel(id)?;
        self.write(WriteOp::RemoveRelProperty(id, key.to_string()));
        Ok(())
    }

    async fn delete_relationship(&mut self, id: RelId) -> Result<(), GraphError> {
        self.existing_rel(id)?;
        self.write(WriteOp::DeleteRel(id));
        Ok(())
    }

    async fn relationships(
        &mut self,
        node: NodeId,
        rel_type: &str,
        direction: Direction,
    ) -> Result<Vec<RelationshipRecord>, GraphError> {
        Ok(self.view.relationships_of(node, rel_type, direction))
    }

    async fn find(&mut self, query: &NodeQuery) -> Result<Vec<NodeRecord>, GraphError> {
        Ok(self.view.find(query))
    }

    async fn count(&mut self, query: &NodeQuery) -> Result<usize, GraphError> {
        Ok(self.view.find(&query.unwindowed()).len())
    }

    async fn ensure_index(&mut self, label: &str, property: &str, unique: bool) -> Result<(), GraphError> {
        self.write(WriteOp::Index(IndexDef {
            label: label.to_string(),
            property: property.to_string(),
            unique,
        }));
        Ok(())
    }

    async fn commit(mut self) -> Result<(), GraphError> {
        self.finished = true;
        let log = std::mem::take(&mut self.log);
        if log.is_empty() {
            return Ok(());
        }

        let mut state = self.shared.state.write();
        let mut next = state.clone();
        let writes = log.len();
        for op in log {
            next.apply(op);
        }
        if let Some(err) = next.constraint_violation() {
            return Err(err);
        }
        *state = next;
        tracing::debug!(writes, nodes = state.nodes.len(), "Committed memory transaction");
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), GraphError> {
        self.finished = true;
        tracing::debug!(discarded = self.log.len(), "Rolled back memory transaction");
        Ok(())
    }
}

impl Drop for MemoryTxn {
    fn drop(&mut self) {
        if !self.finished && !self.log.is_empty() {
            tracing::warn!(discarded = self.log.len(), "Memory transaction dropped without commit");
        }
    }
}
