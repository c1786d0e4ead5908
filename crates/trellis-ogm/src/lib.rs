//! trellis-ogm: persists entity graphs through a [`trellis_graph::GraphStore`].
//!
//! A [`Mapper`] binds a store to the metadata registry. Work happens inside a
//! [`Session`], one transaction owned by the caller:
//!
//! - [`Repository::save`] writes a batch of entities and their relationships
//!   atomically.
//! - [`Repository::search`] builds a [`Search`] with filters, paging and a
//!   field selection, returning hydrated entities or a [`SearchResult`].
//! - [`Repository::fetch`] loads a lazy relationship in the same transaction.
//! - [`PatchScheduler`] applies versioned one-time [`Patch`]es.

pub mod family;
pub(crate) mod hydrate;
pub(crate) mod lazy;
pub mod mapper;
pub mod patch;
pub mod repository;
pub(crate) mod save;
pub mod search;
pub mod session;
pub mod settings;

pub use mapper::{ensure_indexes, Mapper};
pub use patch::{Patch, PatchError, PatchReport, PatchScheduler, Version};
pub use repository::Repository;
pub use search::{Search, SearchResult};
pub use session::Session;
pub use settings::Settings;
