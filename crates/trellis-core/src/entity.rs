//! Entity capability traits, relationship slots and hydrated documents.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

use crate::metadata::{EntityDescriptor, EntityMapping};
use crate::types::{HasIdentity, Identity};
use crate::value::{Properties, Value};

/// A persistable domain type.
///
/// Implementors declare their mapping table once; the registry turns it into a
/// cached [`EntityDescriptor`]. Scalar access goes through `property` /
/// `set_property` keyed by field name, relationships through
/// [`HasRelationships`].
pub trait Entity: HasIdentity + HasRelationships + Default + Clone + Send + Sync + 'static {
    /// Node label and entity type name.
    const LABEL: &'static str;

    fn mapping() -> EntityMapping;

    /// Current value of a scalar or count field; `None` when unset.
    fn property(&self, field: &str) -> Option<Value>;

    fn set_property(&mut self, field: &str, value: Option<Value>);
}

/// Access to an entity's relationship slots by field name.
pub trait HasRelationships {
    fn relation(&self, _field: &str) -> Option<&dyn RelationSlot> {
        None
    }

    fn relation_mut(&mut self, _field: &str) -> Option<&mut dyn RelationSlot> {
        None
    }
}

/// Required-field checks derived from the descriptor.
pub trait HasRequiredFields {
    /// First required scalar that is unset or blank.
    fn missing_required(&self, descriptor: &EntityDescriptor) -> Option<String>;
}

impl<E: Entity> HasRequiredFields for E {
    fn missing_required(&self, descriptor: &EntityDescriptor) -> Option<String> {
        descriptor
            .required_fields()
            .filter(|f| f.is_scalar())
            .find(|f| self.property(&f.name).map_or(true, |v| v.is_blank()))
            .map(|f| f.name.clone())
    }
}

// ── Relationship slots ────────────────────────────────────────────

/// Edges the caller asked the orchestrator to write for one field.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRelation {
    pub targets: Vec<Identity>,
    /// Remove existing edges of the field that are not among `targets`.
    pub replace: bool,
}

/// Type-erased view of a [`Related`] field.
pub trait RelationSlot: Send + Sync {
    /// Whether related entities have been hydrated or assigned.
    fn is_loaded(&self) -> bool;

    /// Assignments made since the slot was last clean.
    fn pending(&self) -> Option<PendingRelation>;

    /// Replace the contents with hydrated documents.
    fn fill(&mut self, documents: &[Document]);

    /// Forget pending assignments after a successful save.
    fn mark_clean(&mut self);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum SlotState {
    #[default]
    Clean,
    Assigned {
        replace: bool,
    },
}

/// Related entities held by reference to their identity, never owned
/// exclusively. `None` means not loaded, which differs from "loaded, empty".
#[derive(Debug, Clone)]
pub struct Related<T> {
    items: Option<Vec<T>>,
    state: SlotState,
}

impl<T> Default for Related<T> {
    fn default() -> Self {
        Self {
            items: None,
            state: SlotState::Clean,
        }
    }
}

impl<T> Related<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity. Existing edges stay unless the slot was cleared.
    pub fn add(&mut self, item: T) {
        self.items.get_or_insert_with(Vec::new).push(item);
        self.assign(false);
    }

    /// Assign the full set, keeping existing edges in the store.
    pub fn set(&mut self, items: Vec<T>) {
        self.items = Some(items);
        self.assign(false);
    }

    /// Assign a single entity. Single-cardinality fields replace their edge.
    pub fn set_one(&mut self, item: T) {
        self.set(vec![item]);
    }

    /// Assign the full set and drop stored edges not in it.
    pub fn replace(&mut self, items: Vec<T>) {
        self.items = Some(items);
        self.assign(true);
    }

    /// Remove every stored edge of this field on the next save.
    pub fn clear(&mut self) {
        self.replace(Vec::new());
    }

    fn assign(&mut self, replace: bool) {
        let replace = replace || matches!(self.state, SlotState::Assigned { replace: true });
        self.state = SlotState::Assigned { replace };
    }

    pub fn get(&self) -> Option<&[T]> {
        self.items.as_deref()
    }

    pub fn first(&self) -> Option<&T> {
        self.items.as_ref().and_then(|items| items.first())
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.items.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_loaded(&self) -> bool {
        self.items.is_some()
    }

    pub fn is_unloaded(&self) -> bool {
        self.items.is_none()
    }
}

impl<T: Entity> RelationSlot for Related<T> {
    fn is_loaded(&self) -> bool {
        self.items.is_some()
    }

    fn pending(&self) -> Option<PendingRelation> {
        match self.state {
            SlotState::Clean => None,
            SlotState::Assigned { replace } => Some(PendingRelation {
                targets: self.iter().map(|t| t.identity().clone()).collect(),
                replace,
            }),
        }
    }

    fn fill(&mut self, documents: &[Document]) {
        self.items = Some(documents.iter().map(from_document::<T>).collect());
        self.state = SlotState::Clean;
    }

    fn mark_clean(&mut self) {
        self.state = SlotState::Clean;
    }
}

impl<T: Serialize> Serialize for Related<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.items.serialize(serializer)
    }
}

// ── Documents ─────────────────────────────────────────────────────

/// A hydrated node: identity, the selected properties keyed by field name,
/// and the selected relationships.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Document {
    #[serde(flatten)]
    pub identity: Identity,
    #[serde(rename = "type")]
    pub label: String,
    #[serde(flatten)]
    pub properties: Properties,
    #[serde(flatten)]
    pub relations: BTreeMap<String, Vec<Document>>,
    /// Properties of the edge this document was reached through.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge: Option<Properties>,
}

impl Document {
    pub fn new(identity: Identity, label: impl Into<String>) -> Self {
        Self {
            identity,
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.properties.get(field)
    }

    pub fn related(&self, field: &str) -> &[Document] {
        self.relations.get(field).map_or(&[], Vec::as_slice)
    }
}

/// Build an entity from a hydrated document. Fields absent from the document
/// keep their defaults; relationships absent from it stay unloaded.
pub fn from_document<E: Entity>(document: &Document) -> E {
    let mut entity = E::default();
    *entity.identity_mut() = document.identity.clone();
    for (field, value) in &document.properties {
        entity.set_property(field, Some(value.clone()));
    }
    for (field, related) in &document.relations {
        if let Some(slot) = entity.relation_mut(field) {
            slot.fill(related);
        }
    }
    entity
}

/// Short human-readable reference such as `Person(3f2a...)`, used in logs.
pub fn entity_ref<E: Entity>(entity: &E) -> String {
    format!("{}({})", E::LABEL, entity.identity())
}
