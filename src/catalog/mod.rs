//! Backing store access and the in-memory registries.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           ArtifactResolver              │
//! └──────────────┬──────────────────────────┘
//!                │
//!                ▼
//! ┌─────────────────────────────────────────┐
//! │               Catalog                   │
//! │  Arc<CatalogSnapshot> (swapped on load) │
//! │   ├─ CollectionRegistry (by name)       │
//! │   └─ StorageRegistry    (by id)         │
//! └──────────────┬──────────────────────────┘
//!                │
//!                ▼
//! ┌─────────────────────────────────────────┐
//! │          MediaStore trait               │
//! │   SqlMediaStore (collection, storage,   │
//! │                  fullcache tables)      │
//! └─────────────────────────────────────────┘
//! ```

mod model;
mod mysql;
mod registry;
mod store;

pub use model::{
    single_joining_slash, ArtifactDescriptor, ArtifactKey, Collection, Storage,
};
pub use mysql::SqlMediaStore;
pub use registry::{Catalog, CatalogSnapshot, CollectionRegistry, StorageRegistry};
pub use store::MediaStore;
