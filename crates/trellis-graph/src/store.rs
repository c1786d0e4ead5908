//! Graph store primitives the mapper is written against.
//!
//! A [`GraphStore`] hands out transactions; everything else happens on a
//! [`GraphTxn`]. Backends: [`crate::MemoryGraph`] and [`crate::Neo4jGraph`].

use async_trait::async_trait;
use serde::Serialize;

use trellis_core::{Direction, FilterOp, NodeId, Properties, RelId, SortOrder, Value};

use crate::client::GraphError;

// ── Records ───────────────────────────────────────────────────────

/// A node as read from the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub label: String,
    pub properties: Properties,
}

/// A relationship as read from the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationshipRecord {
    pub id: RelId,
    pub rel_type: String,
    pub start: NodeId,
    pub end: NodeId,
    pub properties: Properties,
}

impl RelationshipRecord {
    /// The endpoint that is not `node`.
    pub fn other(&self, node: NodeId) -> NodeId {
        if self.start == node {
            self.end
        } else {
            self.start
        }
    }
}

// ── Query plan ────────────────────────────────────────────────────

/// One conjunct of a [`NodeQuery`].
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Property {
        key: String,
        op: FilterOp,
    },
    PropertyIn {
        key: String,
        values: Vec<Value>,
    },
    IdIn(Vec<NodeId>),
    /// A neighbour across one relationship satisfies a property predicate.
    Related {
        rel_type: String,
        direction: Direction,
        target_label: Option<String>,
        key: String,
        op: FilterOp,
    },
}

/// Nodes of one label matching every condition, ordered and windowed.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeQuery {
    pub label: String,
    pub conditions: Vec<Condition>,
    /// Empty means store order (ascending node id).
    pub order_by: Vec<(String, SortOrder)>,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl NodeQuery {
    pub fn label(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            conditions: Vec::new(),
            order_by: Vec::new(),
            skip: 0,
            limit: None,
        }
    }

    pub fn with(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn where_eq(self, key: &str, value: impl Into<Value>) -> Self {
        self.with(Condition::Property {
            key: key.to_string(),
            op: FilterOp::Equals(value.into()),
        })
    }

    pub fn order(mut self, key: &str, order: SortOrder) -> Self {
        self.order_by.push((key.to_string(), order));
        self
    }

    pub fn window(mut self, skip: usize, limit: Option<usize>) -> Self {
        self.skip = skip;
        self.limit = limit;
        self
    }

    /// The same query without ordering or window, for counting.
    pub fn unwindowed(&self) -> Self {
        Self {
            label: self.label.clone(),
            conditions: self.conditions.clone(),
            order_by: Vec::new(),
            skip: 0,
            limit: None,
        }
    }
}

// ── Store traits ──────────────────────────────────────────────────

/// A graph store that can open transactions. Clone is cheap.
#[async_trait]
pub trait GraphStore: Clone + Send + Sync + 'static {
    type Txn: GraphTxn;

    async fn begin(&self) -> Result<Self::Txn, GraphError>;
}

/// Node and relationship CRUD plus query execution inside one transaction.
///
/// Dropping a transaction without committing rolls it back.
#[async_trait]
pub trait GraphTxn: Send + 'static {
    async fn create_node(&mut self, label: &str, properties: Properties) -> Result<NodeId, GraphError>;

    async fn node(&mut self, id: NodeId) -> Result<Option<NodeRecord>, GraphError>;

    async fn set_property(&mut self, id: NodeId, key: &str, value: Value) -> Result<(), GraphError>;

    async fn remove_property(&mut self, id: NodeId, key: &str) -> Result<(), GraphError>;

    /// Delete a node together with all its relationships.
    async fn delete_node(&mut self, id: NodeId) -> Result<(), GraphError>;

    async fn create_relationship(
        &mut self,
        start: NodeId,
        end: NodeId,
        rel_type: &str,
        properties: Properties,
    ) -> Result<RelId, GraphError>;

    async fn set_relationship_property(&mut self, id: RelId, key: &str, value: Value) -> Result<(), GraphError>;

    async fn remove_relationship_property(&mut self, id: RelId, key: &str) -> Result<(), GraphError>;

    async fn delete_relationship(&mut self, id: RelId) -> Result<(), GraphError>;

    /// Relationships of `rel_type` touching `node` in `direction`, ordered by id.
    async fn relationships(
        &mut self,
        node: NodeId,
        rel_type: &str,
        direction: Direction,
    ) -> Result<Vec<RelationshipRecord>, GraphError>;

    async fn find(&mut self, query: &NodeQuery) -> Result<Vec<NodeRecord>, GraphError>;

    /// Number of matches, ignoring order and window.
    async fn count(&mut self, query: &NodeQuery) -> Result<usize, GraphError>;

    async fn ensure_index(&mut self, label: &str, property: &str, unique: bool) -> Result<(), GraphError>;

    async fn commit(self) -> Result<(), GraphError>;

    async fn rollback(self) -> Result<(), GraphError>;
}
