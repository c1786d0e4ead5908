//! Cypher rendering of the store primitives.
//!
//! Labels, relationship types and property keys are spliced into the query
//! text (Cypher cannot parameterise them), so every identifier is validated
//! and backtick-quoted. Values always travel as parameters.

use trellis_core::{Direction, FilterOp, NodeId, Properties, RelId, SortOrder, Value};

use crate::client::GraphError;
use crate::store::{Condition, NodeQuery};

/// Columns every node-returning query yields.
const NODE_COLUMNS: &str = "id(n) AS id, labels(n)[0] AS label, properties(n) AS props";

/// Query text plus its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CypherQuery {
    pub text: String,
    pub params: Vec<(String, Value)>,
}

impl CypherQuery {
    fn new(text: String) -> Self {
        Self {
            text,
            params: Vec::new(),
        }
    }

    fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.push((key.to_string(), value.into()));
        self
    }

    /// Register a parameter and return its placeholder.
    fn bind(&mut self, value: Value) -> String {
        let key = format!("p{}", self.params.len());
        let placeholder = format!("${key}");
        self.params.push((key, value));
        placeholder
    }
}

/// Validate and backtick-quote a label, type or key.
pub fn identifier(name: &str) -> Result<String, GraphError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(format!("`{name}`"))
    } else {
        Err(GraphError::InvalidIdentifier(name.to_string()))
    }
}

fn set_clause(var: &str, properties: &Properties, query: &mut CypherQuery) -> Result<String, GraphError> {
    let mut assignments = Vec::with_capacity(properties.len());
    for (key, value) in properties {
        let key = identifier(key)?;
        let placeholder = query.bind(value.clone());
        assignments.push(format!("{var}.{key} = {placeholder}"));
    }
    if assignments.is_empty() {
        Ok(String::new())
    } else {
        Ok(format!(" SET {}", assignments.join(", ")))
    }
}

fn pattern(direction: Direction, rel: &str) -> String {
    match direction {
        Direction::Outgoing => format!("-[{rel}]->"),
        Direction::Incoming => format!("<-[{rel}]-"),
        Direction::Both => format!("-[{rel}]-"),
    }
}

// ── Node primitives ───────────────────────────────────────────────

pub fn create_node(label: &str, properties: &Properties) -> Result<CypherQuery, GraphError> {
    let label = identifier(label)?;
    let mut query = CypherQuery::new(String::new());
    let set = set_clause("n", properties, &mut query)?;
    query.text = format!("CREATE (n:{label}){set} RETURN id(n) AS id");
    Ok(query)
}

pub fn node(id: NodeId) -> CypherQuery {
    CypherQuery::new(format!("MATCH (n) WHERE id(n) = $id RETURN {NODE_COLUMNS}")).param("id", id.0)
}

pub fn set_property(id: NodeId, key: &str, value: Value) -> Result<CypherQuery, GraphError> {
    let key = identifier(key)?;
    Ok(CypherQuery::new(format!("MATCH (n) WHERE id(n) = $id SET n.{key} = $value RETURN id(n) AS id"))
        .param("id", id.0)
        .param("value", value))
}

pub fn remove_property(id: NodeId, key: &str) -> Result<CypherQuery, GraphError> {
    let key = identifier(key)?;
    Ok(CypherQuery::new(format!("MATCH (n) WHERE id(n) = $id REMOVE n.{key} RETURN id(n) AS id")).param("id", id.0))
}

pub fn delete_node(id: NodeId) -> CypherQuery {
    CypherQuery::new("MATCH (n) WHERE id(n) = $id DETACH DELETE n RETURN count(n) AS deleted".to_string()).param("id", id.0)
}

// ── Relationship primitives ───────────────────────────────────────

pub fn create_relationship(
    start: NodeId,
    end: NodeId,
    rel_type: &str,
    properties: &Properties,
) -> Result<CypherQuery, GraphError> {
    let rel_type = identifier(rel_type)?;
    let mut query = CypherQuery::new(String::new()).param("start", start.0).param("end", end.0);
    let set = set_clause("r", properties, &mut query)?;
    query.text = format!(
        "MATCH (a), (b) WHERE id(a) = $start AND id(b) = $end \
         CREATE (a)-[r:{rel_type}]->(b){set} RETURN id(r) AS id"
    );
    Ok(query)
}

pub fn set_relationship_property(id: RelId, key: &str, value: Value) -> Result<CypherQuery, GraphError> {
    let key = identifier(key)?;
    Ok(
        CypherQuery::new(format!("MATCH ()-[r]->() WHERE id(r) = $id SET r.{key} = $value RETURN id(r) AS id"))
            .param("id", id.0)
            .param("value", value),
    )
}

pub fn remove_relationship_property(id: RelId, key: &str) -> Result<CypherQuery, GraphError> {
    let key = identifier(key)?;
    Ok(
        CypherQuery::new(format!("MATCH ()-[r]->() WHERE id(r) = $id REMOVE r.{key} RETURN id(r) AS id"))
            .param("id", id.0),
    )
}

pub fn delete_relationship(id: RelId) -> CypherQuery {
    CypherQuery::new("MATCH ()-[r]->() WHERE id(r) = $id DELETE r RETURN count(r) AS deleted".to_string()).param("id", id.0)
}

pub fn relationships(node: NodeId, rel_type: &str, direction: Direction) -> Result<CypherQuery, GraphError> {
    let rel = format!("r:{}", identifier(rel_type)?);
    let arrow = pattern(direction, &rel);
    Ok(CypherQuery::new(format!(
        "MATCH (n){arrow}(m) WHERE id(n) = $id \
         RETURN DISTINCT id(r) AS id, type(r) AS type, id(startNode(r)) AS start, \
         id(endNode(r)) AS end, properties(r) AS props ORDER BY id"
    ))
    .param("id", node.0))
}

// ── Queries ───────────────────────────────────────────────────────

fn comparison(subject: &str, op: &FilterOp, query: &mut CypherQuery) -> String {
    match op {
        FilterOp::Equals(v) => format!("{subject} = {}", query.bind(v.clone())),
        FilterOp::NotEquals(v) => {
            let p = query.bind(v.clone());
            format!("({subject} IS NULL OR {subject} <> {p})")
        }
        FilterOp::GreaterThan(v) => format!("{subject} > {}", query.bind(v.clone())),
        FilterOp::LessThan(v) => format!("{subject} < {}", query.bind(v.clone())),
        FilterOp::StartsWith(s) => format!("{subject} STARTS WITH {}", query.bind(Value::from(s.as_str()))),
        FilterOp::EndsWith(s) => format!("{subject} ENDS WITH {}", query.bind(Value::from(s.as_str()))),
        FilterOp::Contains(s) => format!("{subject} CONTAINS {}", query.bind(Value::from(s.as_str()))),
    }
}

fn condition(cond: &Condition, query: &mut CypherQuery) -> Result<String, GraphError> {
    Ok(match cond {
        Condition::Property { key, op } => comparison(&format!("n.{}", identifier(key)?), op, query),
        Condition::PropertyIn { key, values } => {
            let key = identifier(key)?;
            format!("n.{key} IN {}", query.bind(Value::List(values.clone())))
        }
        Condition::IdIn(ids) => {
            let ids = Value::List(ids.iter().map(|id| Value::Int(id.0)).collect());
            format!("id(n) IN {}", query.bind(ids))
        }
        Condition::Related {
            rel_type,
            direction,
            target_label,
            key,
            op,
        } => {
            let arrow = pattern(*direction, &format!(":{}", identifier(rel_type)?));
            let target = match target_label {
                Some(label) => format!("m:{}", identifier(label)?),
                None => "m".to_string(),
            };
            let test = comparison(&format!("m.{}", identifier(key)?), op, query);
            format!("EXISTS {{ MATCH (n){arrow}({target}) WHERE {test} }}")
        }
    })
}

fn match_clause(node_query: &NodeQuery, query: &mut CypherQuery) -> Result<String, GraphError> {
    let label = identifier(&node_query.label)?;
    let mut conditions = Vec::with_capacity(node_query.conditions.len());
    for cond in &node_query.conditions {
        conditions.push(condition(cond, query)?);
    }
    if conditions.is_empty() {
        Ok(format!("MATCH (n:{label})"))
    } else {
        Ok(format!("MATCH (n:{label}) WHERE {}", conditions.join(" AND ")))
    }
}

pub fn find(node_query: &NodeQuery) -> Result<CypherQuery, GraphError> {
    let mut query = CypherQuery::new(String::new());
    let matched = match_clause(node_query, &mut query)?;

    let mut order = Vec::with_capacity(node_query.order_by.len() + 1);
    for (key, direction) in &node_query.order_by {
        let direction = match direction {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        order.push(format!("n.{} {direction}", identifier(key)?));
    }
    order.push("id(n) ASC".to_string());

    let mut text = format!("{matched} RETURN {NODE_COLUMNS} ORDER BY {}", order.join(", "));
    if node_query.skip > 0 {
        text.push_str(&format!(" SKIP {}", query.bind(Value::Int(node_query.skip as i64))));
    }
    if let Some(limit) = node_query.limit {
        text.push_str(&format!(" LIMIT {}", query.bind(Value::Int(limit as i64))));
    }
    query.text = text;
    Ok(query)
}

pub fn count(node_query: &NodeQuery) -> Result<CypherQuery, GraphError> {
    let mut query = CypherQuery::new(String::new());
    let matched = match_clause(node_query, &mut query)?;
    query.text = format!("{matched} RETURN count(n) AS total");
    Ok(query)
}

pub fn ensure_index(label: &str, property: &str, unique: bool) -> Result<CypherQuery, GraphError> {
    let name = identifier(&format!("trellis_{label}_{property}"))?;
    let label = identifier(label)?;
    let property = identifier(property)?;
    let text = if unique {
        format!("CREATE CONSTRAINT {name} IF NOT EXISTS FOR (n:{label}) REQUIRE n.{property} IS UNIQUE")
    } else {
        format!("CREATE INDEX {name} IF NOT EXISTS FOR (n:{label}) ON (n.{property})")
    };
    Ok(CypherQuery::new(text))
}
