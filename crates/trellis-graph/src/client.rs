//! Neo4j connection management and the Bolt-backed graph store.

use async_trait::async_trait;
use neo4rs::{BoltType, ConfigBuilder, Graph, Query, Row, Txn};
use serde::Deserialize;

use trellis_core::{Direction, NodeId, OgmError, Properties, RelId, Value};

use crate::cypher::{self, CypherQuery};
use crate::store::{GraphStore, GraphTxn, NodeQuery, NodeRecord, RelationshipRecord};

/// Errors from graph operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Neo4j connection error: {0}")]
    Connection(String),

    #[error("Neo4j query error: {0}")]
    Query(#[from] neo4rs::Error),

    #[error("{kind} not found: id {id}")]
    NotFound { kind: &'static str, id: i64 },

    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<GraphError> for OgmError {
    fn from(err: GraphError) -> Self {
        OgmError::graph(err)
    }
}

/// Configuration for connecting to Neo4j.
///
/// Loaded from the `[neo4j]` section of `trellis.toml` or
/// `TRELLIS__NEO4J__*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "default_uri")]
    pub uri: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,
}

fn default_uri() -> String {
    "bolt://localhost:7687".to_string()
}

fn default_user() -> String {
    "neo4j".to_string()
}

fn default_password() -> String {
    "trellis-dev".to_string()
}

fn default_max_connections() -> u32 {
    16
}

fn default_fetch_size() -> usize {
    256
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            user: default_user(),
            password: default_password(),
            max_connections: default_max_connections(),
            fetch_size: default_fetch_size(),
        }
    }
}

/// Thread-safe Neo4j graph store with connection pooling.
///
/// Clone is cheap (inner Arc).
#[derive(Clone)]
pub struct Neo4jGraph {
    graph: Graph,
}

impl Neo4jGraph {
    /// Connect to Neo4j with the given configuration.
    pub async fn connect(config: &GraphConfig) -> Result<Self, GraphError> {
        let neo_config = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .max_connections(config.max_connections as usize)
            .fetch_size(config.fetch_size)
            .build()
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        let graph = Graph::connect(neo_config)
            .await
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        tracing::info!(uri = %config.uri, "Connected to Neo4j");
        Ok(Self { graph })
    }

    /// Get a reference to the underlying neo4rs Graph for direct operations.
    pub fn inner(&self) -> &Graph {
        &self.graph
    }
}

#[async_trait]
impl GraphStore for Neo4jGraph {
    type Txn = Neo4jTxn;

    async fn begin(&self) -> Result<Neo4jTxn, GraphError> {
        Ok(Neo4jTxn {
            txn: self.graph.start_txn().await?,
            graph: self.graph.clone(),
        })
    }
}

/// An explicit Bolt transaction. Neo4j rolls it back if it is dropped open.
pub struct Neo4jTxn {
    txn: Txn,
    graph: Graph,
}

fn to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Bool(b) => BoltType::from(*b),
        Value::Int(i) => BoltType::from(*i),
        Value::Float(f) => BoltType::from(*f),
        Value::String(s) => BoltType::from(s.clone()),
        Value::List(items) => BoltType::from(items.iter().map(to_bolt).collect::<Vec<BoltType>>()),
    }
}

fn to_query(cypher: CypherQuery) -> Query {
    cypher
        .params
        .iter()
        .fold(neo4rs::query(&cypher.text), |q, (key, value)| q.param(key, to_bolt(value)))
}

fn column<T: serde::de::DeserializeOwned>(row: &Row, key: &str) -> Result<T, GraphError> {
    row.get::<T>(key)
        .map_err(|e| GraphError::Serialization(format!("Failed to read column {key}: {e}")))
}

fn node_record(row: &Row) -> Result<NodeRecord, GraphError> {
    Ok(NodeRecord {
        id: NodeId(column(row, "id")?),
        label: column(row, "label")?,
        properties: column(row, "props")?,
    })
}

impl Neo4jTxn {
    async fn rows(&mut self, cypher: CypherQuery) -> Result<Vec<Row>, GraphError> {
        tracing::trace!(query = %cypher.text, "Executing Cypher");
        let mut stream = self.txn.execute(to_query(cypher)).await?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next(self.txn.handle()).await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Run a statement that must touch exactly the addressed entity.
    async fn touch(&mut self, cypher: CypherQuery, kind: &'static str, id: i64) -> Result<(), GraphError> {
        if self.rows(cypher).await?.is_empty() {
            return Err(GraphError::NotFound { kind, id });
        }
        Ok(())
    }

    /// Run a delete and fail when nothing matched.
    async fn delete(&mut self, cypher: CypherQuery, kind: &'static str, id: i64) -> Result<(), GraphError> {
        let deleted: i64 = match self.rows(cypher).await?.first() {
            Some(row) => column(row, "deleted")?,
            None => 0,
        };
        if deleted == 0 {
            return Err(GraphError::NotFound { kind, id });
        }
        Ok(())
    }

    async fn returned_id(&mut self, cypher: CypherQuery, kind: &'static str, id: i64) -> Result<i64, GraphError> {
        match self.rows(cypher).await?.first() {
            Some(row) => column(row, "id"),
            None => Err(GraphError::NotFound { kind, id }),
        }
    }
}

#[async_trait]
impl GraphTxn for Neo4jTxn {
    async fn create_node(&mut self, label: &str, properties: Properties) -> Result<NodeId, GraphError> {
        let id = self
            .returned_id(cypher::create_node(label, &properties)?, "node", -1)
            .await?;
        Ok(NodeId(id))
    }

    async fn node(&mut self, id: NodeId) -> Result<Option<NodeRecord>, GraphError> {
        self.rows(cypher::node(id)).await?.first().map(node_record).transpose()
    }

    async fn set_property(&mut self, id: NodeId, key: &str, value: Value) -> Result<(), GraphError> {
        self.touch(cypher::set_property(id, key, value)?, "node", id.0).await
    }

    async fn remove_property(&mut self, id: NodeId, key: &str) -> Result<(), GraphError> {
        self.touch(cypher::remove_property(id, key)?, "node", id.0).await
    }

    async fn delete_node(&mut self, id: NodeId) -> Result<(), GraphError> {
        self.delete(cypher::delete_node(id), "node", id.0).await
    }

    async fn create_relationship(
        &mut self,
        start: NodeId,
        end: NodeId,
        rel_type: &str,
        properties: Properties,
    ) -> Result<RelId, GraphError> {
        let query = cypher::create_relationship(start, end, rel_type, &properties)?;
        let id = self.returned_id(query, "node", start.0).await?;
        Ok(RelId(id))
    }

    async fn set_relationship_property(&mut self, id: RelId, key: &str, value: Value) -> Result<(), GraphError> {
        self.touch(cypher::set_relationship_property(id, key, value)?, "relationship", id.0)
            .await
    }

    async fn remove_relationship_property(&mut self, id: RelId, key: &str) -> Result<(), GraphError> {
        self.touch(cypher::remove_relationship_property(id, key)?, "relationship", id.0)
            .await
    }

    async fn delete_relationship(&mut self, id: RelId) -> Result<(), GraphError> {
        self.delete(cypher::delete_relationship(id), "relationship", id.0).await
    }

    async fn relationships(
        &mut self,
        node: NodeId,
        rel_type: &str,
        direction: Direction,
    ) -> Result<Vec<RelationshipRecord>, GraphError> {
        let rows = self.rows(cypher::relationships(node, rel_type, direction)?).await?;
        rows.iter()
            .map(|row| {
                Ok(RelationshipRecord {
                    id: RelId(column(row, "id")?),
                    rel_type: column(row, "type")?,
                    start: NodeId(column(row, "start")?),
                    end: NodeId(column(row, "end")?),
                    properties: column(row, "props")?,
                })
            })
            .collect()
    }

    async fn find(&mut self, query: &NodeQuery) -> Result<Vec<NodeRecord>, GraphError> {
        let rows = self.rows(cypher::find(query)?).await?;
        rows.iter().map(node_record).collect()
    }

    async fn count(&mut self, query: &NodeQuery) -> Result<usize, GraphError> {
        let rows = self.rows(cypher::count(query)?).await?;
        let total: i64 = match rows.first() {
            Some(row) => column(row, "total")?,
            None => 0,
        };
        Ok(total.max(0) as usize)
    }

    async fn ensure_index(&mut self, label: &str, property: &str, unique: bool) -> Result<(), GraphError> {
        // Runs on its own auto-commit connection: Neo4j rejects schema
        // statements inside a transaction that also writes data.
        let statement = cypher::ensure_index(label, property, unique)?;
        tracing::debug!(label, property, unique, "Ensuring index");
        self.graph.run(to_query(statement)).await?;
        Ok(())
    }

    async fn commit(self) -> Result<(), GraphError> {
        self.txn.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), GraphError> {
        self.txn.rollback().await?;
        Ok(())
    }
}
