//! A small family model used by the `trellis demo` command and the tests.

use async_trait::async_trait;
use serde::Serialize;

use trellis_core::entity::RelationSlot;
use trellis_core::{
    Entity, EntityMapping, FieldDescriptor, HasIdentity, HasRelationships, Identity, Related, Result, Value,
};
use trellis_graph::GraphStore;

use crate::mapper::Mapper;
use crate::patch::{Patch, Version};
use crate::session::Session;

#[derive(Debug, Clone, Default, Serialize)]
pub struct Person {
    #[serde(flatten)]
    pub identity: Identity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_count: Option<i64>,
    #[serde(skip_serializing_if = "Related::is_unloaded")]
    pub married_with: Related<Person>,
    #[serde(skip_serializing_if = "Related::is_unloaded")]
    pub parents: Related<Person>,
    #[serde(skip_serializing_if = "Related::is_unloaded")]
    pub children: Related<Person>,
}

impl Person {
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn aged(mut self, age: i64) -> Self {
        self.age = Some(age);
        self
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }
}

impl HasIdentity for Person {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut Identity {
        &mut self.identity
    }
}

impl HasRelationships for Person {
    fn relation(&self, field: &str) -> Option<&dyn RelationSlot> {
        match field {
            "married_with" => Some(&self.married_with),
            "parents" => Some(&self.parents),
            "children" => Some(&self.children),
            _ => None,
        }
    }

    fn relation_mut(&mut self, field: &str) -> Option<&mut dyn RelationSlot> {
        match field {
            "married_with" => Some(&mut self.married_with),
            "parents" => Some(&mut self.parents),
            "children" => Some(&mut self.children),
            _ => None,
        }
    }
}

impl Entity for Person {
    const LABEL: &'static str = "Person";

    fn mapping() -> EntityMapping {
        EntityMapping::new()
            .field(FieldDescriptor::scalar("name").unique().indexed().required())
            .field(FieldDescriptor::scalar("age").null_remove())
            .field(FieldDescriptor::count("child_count", "ChildOf").incoming())
            .field(FieldDescriptor::relationship::<Person>("married_with", "MarriedWith").both().single())
            .field(FieldDescriptor::relationship::<Person>("parents", "ChildOf").outgoing().lazy())
            .field(FieldDescriptor::relationship::<Person>("children", "ChildOf").incoming().lazy())
    }

    fn property(&self, field: &str) -> Option<Value> {
        match field {
            "name" => self.name.clone().map(Value::from),
            "age" => self.age.map(Value::from),
            "child_count" => self.child_count.map(Value::from),
            _ => None,
        }
    }

    fn set_property(&mut self, field: &str, value: Option<Value>) {
        match field {
            "name" => self.name = value.and_then(Value::into_string),
            "age" => self.age = value.and_then(|v| v.as_i64()),
            "child_count" => self.child_count = value.and_then(|v| v.as_i64()),
            _ => {}
        }
    }
}

/// 1.0.0: indexes and unique constraints for the family model.
pub struct EnsureFamilyIndexes;

#[async_trait]
impl<S: GraphStore> Patch<S> for EnsureFamilyIndexes {
    fn version(&self) -> Version {
        Version::new(1, 0, 0)
    }

    async fn update(&self, mapper: &Mapper<S>, _session: &mut Session<S::Txn>) -> Result<()> {
        // Schema statements get their own transaction on Neo4j.
        mapper.describe::<Person>()?;
        mapper.ensure_schema().await?;
        Ok(())
    }
}

/// 1.1.0: strip stray whitespace from stored names.
pub struct TrimNames;

#[async_trait]
impl<S: GraphStore> Patch<S> for TrimNames {
    fn version(&self) -> Version {
        Version::new(1, 1, 0)
    }

    async fn update(&self, mapper: &Mapper<S>, session: &mut Session<S::Txn>) -> Result<()> {
        let people = mapper.repository::<Person>()?;
        let search = people.search();
        let total = search.count(session).await?;
        let mut changed: Vec<Person> = search
            .limit(total.max(1))
            .list(session)
            .await?
            .into_iter()
            .filter(|p| p.name().trim() != p.name())
            .map(|mut p| {
                p.name = Some(p.name().trim().to_string());
                p
            })
            .collect();
        people.save(session, &mut changed).await?;
        tracing::info!(trimmed = changed.len(), "Normalized person names");
        Ok(())
    }
}

/// Every patch of the family model, unordered.
pub fn family_patches<S: GraphStore>() -> Vec<Box<dyn Patch<S>>> {
    vec![Box::new(TrimNames), Box::new(EnsureFamilyIndexes)]
}
