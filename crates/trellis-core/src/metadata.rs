//! Entity descriptors and the registry that builds and caches them.
//!
//! Each entity type declares a mapping table ([`EntityMapping`]) through
//! [`Entity::mapping`]. The [`Registry`] validates the table on first use and
//! caches the resulting [`EntityDescriptor`] for the lifetime of the process.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::{OgmError, Result};
use crate::fields::{FieldList, QueryField};

/// Store properties every node carries besides its declared scalars.
pub const RESERVED_PROPERTIES: [&str; 4] = ["uuid", "type", "created", "last_modified"];

// ── Mapping rules ─────────────────────────────────────────────────

/// Direction of a relationship as seen from the declaring entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Outgoing,
    Incoming,
    Both,
}

impl Direction {
    pub fn reverse(self) -> Self {
        match self {
            Self::Outgoing => Self::Incoming,
            Self::Incoming => Self::Outgoing,
            Self::Both => Self::Both,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Outgoing => f.write_str("outgoing"),
            Self::Incoming => f.write_str("incoming"),
            Self::Both => f.write_str("both"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    Single,
    #[default]
    Multiple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Scalar,
    Relationship,
    /// Number of relationships of a type, computed at read time.
    Count,
}

/// The entity type at the far end of a relationship field.
#[derive(Clone, Copy)]
pub struct TargetType {
    pub label: &'static str,
    describe: fn(&Registry) -> Result<Arc<EntityDescriptor>>,
}

impl TargetType {
    pub fn of<T: Entity>() -> Self {
        Self {
            label: T::LABEL,
            describe: describe_target::<T>,
        }
    }

    pub fn describe(&self, registry: &Registry) -> Result<Arc<EntityDescriptor>> {
        (self.describe)(registry)
    }
}

fn describe_target<T: Entity>(registry: &Registry) -> Result<Arc<EntityDescriptor>> {
    registry.describe::<T>()
}

impl fmt::Debug for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TargetType").field(&self.label).finish()
    }
}

#[derive(Debug, Clone)]
pub struct RelationshipRule {
    pub rel_type: String,
    pub direction: Direction,
    pub cardinality: Cardinality,
    pub lazy: bool,
    /// Only hydrate related nodes whose label matches the target type.
    pub restrict_type: bool,
    /// `None` for count fields.
    pub target: Option<TargetType>,
}

/// One persistable field and its mapping rules.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    /// Store property name; equals `name` unless overridden.
    pub property: String,
    pub unique: bool,
    pub indexed: bool,
    pub required: bool,
    /// A null value removes the property instead of leaving it untouched.
    pub null_remove: bool,
    pub relationship: Option<RelationshipRule>,
}

impl FieldDescriptor {
    pub fn scalar(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::Scalar,
            property: name.to_string(),
            unique: false,
            indexed: false,
            required: false,
            null_remove: false,
            relationship: None,
        }
    }

    /// A relationship field pointing at entities of type `T`. Defaults to
    /// outgoing, multiple, eager.
    pub fn relationship<T: Entity>(name: &str, rel_type: &str) -> Self {
        Self {
            kind: FieldKind::Relationship,
            relationship: Some(RelationshipRule {
                rel_type: rel_type.to_string(),
                direction: Direction::Outgoing,
                cardinality: Cardinality::Multiple,
                lazy: false,
                restrict_type: false,
                target: Some(TargetType::of::<T>()),
            }),
            ..Self::scalar(name)
        }
    }

    pub fn count(name: &str, rel_type: &str) -> Self {
        Self {
            kind: FieldKind::Count,
            relationship: Some(RelationshipRule {
                rel_type: rel_type.to_string(),
                direction: Direction::Outgoing,
                cardinality: Cardinality::Multiple,
                lazy: false,
                restrict_type: false,
                target: None,
            }),
            ..Self::scalar(name)
        }
    }

    pub fn property(mut self, property: &str) -> Self {
        self.property = property.to_string();
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn null_remove(mut self) -> Self {
        self.null_remove = true;
        self
    }

    pub fn outgoing(self) -> Self {
        self.direction(Direction::Outgoing)
    }

    pub fn incoming(self) -> Self {
        self.direction(Direction::Incoming)
    }

    pub fn both(self) -> Self {
        self.direction(Direction::Both)
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        if let Some(rule) = self.relationship.as_mut() {
            rule.direction = direction;
        }
        self
    }

    pub fn single(mut self) -> Self {
        if let Some(rule) = self.relationship.as_mut() {
            rule.cardinality = Cardinality::Single;
        }
        self
    }

    pub fn multiple(mut self) -> Self {
        if let Some(rule) = self.relationship.as_mut() {
            rule.cardinality = Cardinality::Multiple;
        }
        self
    }

    pub fn lazy(mut self) -> Self {
        if let Some(rule) = self.relationship.as_mut() {
            rule.lazy = true;
        }
        self
    }

    pub fn restrict_type(mut self) -> Self {
        if let Some(rule) = self.relationship.as_mut() {
            rule.restrict_type = true;
        }
        self
    }

    pub fn is_scalar(&self) -> bool {
        self.kind == FieldKind::Scalar
    }

    pub fn is_relationship(&self) -> bool {
        self.kind == FieldKind::Relationship
    }

    pub fn is_count(&self) -> bool {
        self.kind == FieldKind::Count
    }

    pub fn is_lazy(&self) -> bool {
        self.relationship.as_ref().is_some_and(|r| r.lazy)
    }

    /// Target descriptor of a relationship field.
    pub fn target(&self, registry: &Registry) -> Option<Result<Arc<EntityDescriptor>>> {
        self.relationship
            .as_ref()
            .and_then(|r| r.target.as_ref())
            .map(|t| t.describe(registry))
    }
}

/// The declarative mapping table an entity type provides.
#[derive(Debug, Clone, Default)]
pub struct EntityMapping {
    fields: Vec<FieldDescriptor>,
}

impl EntityMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }
}

// ── Descriptor ────────────────────────────────────────────────────

/// Validated, immutable mapping of one entity type.
#[derive(Debug)]
pub struct EntityDescriptor {
    pub label: &'static str,
    pub type_name: &'static str,
    fields: Vec<FieldDescriptor>,
}

impl EntityDescriptor {
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn scalars(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_scalar())
    }

    pub fn relationships(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_relationship())
    }

    pub fn counts(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_count())
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.required)
    }

    pub fn unique_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.unique)
    }

    /// Every scalar field, no relationship traversal.
    pub fn default_fields(&self) -> FieldList {
        FieldList::from_fields(self.scalars().map(|f| QueryField::new(&f.name)))
    }

    fn build(label: &'static str, type_name: &'static str, mapping: EntityMapping) -> Result<Self> {
        if label.is_empty() {
            return Err(OgmError::metadata(type_name, "entity label must not be empty"));
        }

        let mut names = HashSet::new();
        let mut properties = HashSet::new();
        for field in &mapping.fields {
            if field.name.is_empty() || field.name == "*" {
                return Err(OgmError::metadata(label, format!("invalid field name \"{}\"", field.name)));
            }
            if !names.insert(field.name.as_str()) {
                return Err(OgmError::metadata(label, format!("field \"{}\" declared twice", field.name)));
            }

            match (&field.kind, &field.relationship) {
                (FieldKind::Scalar, _) => {
                    if RESERVED_PROPERTIES.contains(&field.property.as_str()) {
                        return Err(OgmError::metadata(
                            label,
                            format!("field \"{}\" uses reserved property \"{}\"", field.name, field.property),
                        ));
                    }
                    if !properties.insert(field.property.as_str()) {
                        return Err(OgmError::metadata(
                            label,
                            format!("property \"{}\" claimed by more than one field", field.property),
                        ));
                    }
                }
                (FieldKind::Relationship | FieldKind::Count, Some(rule)) => {
                    if rule.rel_type.trim().is_empty() {
                        return Err(OgmError::metadata(
                            label,
                            format!("relationship field \"{}\" has no type label", field.name),
                        ));
                    }
                    if rule.direction == Direction::Both && rule.cardinality == Cardinality::Multiple {
                        return Err(OgmError::metadata(
                            label,
                            format!(
                                "relationship field \"{}\": direction both requires single cardinality",
                                field.name
                            ),
                        ));
                    }
                    if field.unique || field.indexed || field.null_remove {
                        return Err(OgmError::metadata(
                            label,
                            format!("unique, indexed and null_remove apply to scalar fields only (\"{}\")", field.name),
                        ));
                    }
                }
                (_, None) => {
                    return Err(OgmError::metadata(
                        label,
                        format!("relationship field \"{}\" has no rule", field.name),
                    ));
                }
            }
        }

        Ok(Self {
            label,
            type_name,
            fields: mapping.fields,
        })
    }
}

// ── Registry ──────────────────────────────────────────────────────

/// Process-wide cache of entity descriptors keyed by type.
///
/// Construction is double-checked under an upgradable lock so concurrent first
/// access builds each descriptor exactly once. Entries are never evicted.
#[derive(Default)]
pub struct Registry {
    descriptors: RwLock<HashMap<TypeId, Arc<EntityDescriptor>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by every repository that was not given its own.
    pub fn shared() -> Arc<Registry> {
        static SHARED: OnceLock<Arc<Registry>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(Registry::new())).clone()
    }

    pub fn describe<E: Entity>(&self) -> Result<Arc<EntityDescriptor>> {
        let key = TypeId::of::<E>();
        if let Some(descriptor) = self.descriptors.read().get(&key) {
            return Ok(descriptor.clone());
        }

        let guard = self.descriptors.upgradable_read();
        if let Some(descriptor) = guard.get(&key) {
            return Ok(descriptor.clone());
        }

        let descriptor = Arc::new(EntityDescriptor::build(
            E::LABEL,
            std::any::type_name::<E>(),
            E::mapping(),
        )?);
        tracing::debug!(
            entity = E::LABEL,
            fields = descriptor.fields.len(),
            "Registered entity descriptor"
        );

        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        guard.insert(key, descriptor.clone());
        Ok(descriptor)
    }

    pub fn by_label(&self, label: &str) -> Option<Arc<EntityDescriptor>> {
        self.descriptors
            .read()
            .values()
            .find(|d| d.label == label)
            .cloned()
    }

    /// Every described entity type, ordered by label.
    pub fn entity_types(&self) -> Vec<Arc<EntityDescriptor>> {
        let mut all: Vec<_> = self.descriptors.read().values().cloned().collect();
        all.sort_by_key(|d| d.label);
        all
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("entities", &self.descriptors.read().len())
            .finish()
    }
}
