//! trellis-core: the building blocks of the trellis object-graph mapper.
//!
//! - Property values and identities
//! - Entity capability traits and relationship slots
//! - Entity descriptors and the metadata registry
//! - Field selections and search parameters
//! - Configuration and the error taxonomy

pub mod config;
pub mod entity;
pub mod error;
pub mod fields;
pub mod metadata;
pub mod search;
pub mod types;
pub mod value;

pub use entity::{from_document, Document, Entity, HasRelationships, HasRequiredFields, Related, RelationSlot};
pub use error::{ErrorKind, OgmError, Result};
pub use fields::{FieldList, QueryField};
pub use metadata::{Cardinality, Direction, EntityDescriptor, EntityMapping, FieldDescriptor, Registry};
pub use search::{Filter, FilterOp, OrderBy, SearchParameter, SortOrder};
pub use types::{HasIdentity, Identity, NodeId, RelId};
pub use value::{Properties, Value};
