//! Versioned table definitions: the store synthesis resolves against, the
//! `information_schema` loader, and the persisted JSON snapshot.

pub mod catalog;
pub mod snapshot;
pub mod store;
pub mod version;

pub use catalog::{Catalog, CatalogConfig};
pub use store::SchemaStore;
pub use version::{DdlPosition, FieldInfo, KeyInfo, SchemaVersion};
