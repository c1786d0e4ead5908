//! Identity types shared by entities, the graph store and the mapper.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Store identifiers ─────────────────────────────────────────────

/// Internal numeric id the graph store assigns to a node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub i64);

/// Internal numeric id the graph store assigns to a relationship.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelId(pub i64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Entity identity ───────────────────────────────────────────────

/// The identity pair of an entity: the store's internal id and the external
/// opaque uuid. Both are empty until the first successful persist, unless the
/// caller sets a uuid up front to reference an already stored node.
///
/// An entity hydrated with a projection also remembers which scalar fields
/// were read. Equality and hashing only look at the id pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Identity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// Scalar fields read by a partial load; `None` when all of them were.
    #[serde(skip)]
    pub loaded: Option<BTreeSet<String>>,
}

impl Identity {
    pub fn persisted(id: NodeId, uuid: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            uuid: Some(uuid.into()),
            loaded: None,
        }
    }

    /// Reference to a stored node known only by its uuid.
    pub fn from_uuid(uuid: impl Into<String>) -> Self {
        Self {
            id: None,
            uuid: Some(uuid.into()),
            loaded: None,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    /// Whether the entity's value for `field` reflects the store. Fields a
    /// partial load skipped are unknown, so an absent value there means
    /// nothing.
    pub fn is_loaded(&self, field: &str) -> bool {
        self.loaded.as_ref().map_or(true, |fields| fields.contains(field))
    }

    /// Fresh external identifier in the compact 32-hex-digit form.
    pub fn generate_uuid() -> String {
        Uuid::new_v4().simple().to_string()
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.uuid == other.uuid
    }
}

impl Eq for Identity {}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.uuid.hash(state);
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.uuid, self.id) {
            (Some(uuid), _) => f.write_str(uuid),
            (None, Some(id)) => write!(f, "#{id}"),
            (None, None) => f.write_str("new"),
        }
    }
}

/// Anything that carries an [`Identity`].
pub trait HasIdentity {
    fn identity(&self) -> &Identity;
    fn identity_mut(&mut self) -> &mut Identity;

    fn is_persisted(&self) -> bool {
        self.identity().is_persisted()
    }
}

impl HasIdentity for Identity {
    fn identity(&self) -> &Identity {
        self
    }

    fn identity_mut(&mut self) -> &mut Identity {
        self
    }
}
