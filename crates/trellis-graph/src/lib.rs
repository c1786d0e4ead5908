//! trellis-graph: graph store primitives for the trellis object-graph mapper.
//!
//! The mapper talks to a [`GraphStore`] through transactions ([`GraphTxn`]).
//! Two stores ship here: [`MemoryGraph`], an embedded in-process graph, and
//! [`Neo4jGraph`], a Bolt client that renders every primitive to Cypher.

pub mod client;
pub mod cypher;
pub mod memory;
pub mod store;

pub use client::{GraphConfig, GraphError, Neo4jGraph, Neo4jTxn};
pub use memory::{MemoryGraph, MemoryTxn};
pub use store::{Condition, GraphStore, GraphTxn, NodeQuery, NodeRecord, RelationshipRecord};
