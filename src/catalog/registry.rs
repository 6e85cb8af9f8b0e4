//! Collection and storage registries.
//!
//! Both tables are small and read on every request, so they are loaded once
//! into memory. A load builds a complete [`CatalogSnapshot`] off to the side
//! and then swaps it in; readers hold an `Arc` to one generation for the
//! whole request and never see a half-built table.
//!
//! # Example
//!
//! ```ignore
//! use media_gateway::catalog::{Catalog, SqlMediaStore};
//!
//! let store = SqlMediaStore::connect(url, 10, timeout).await?;
//! let catalog = Catalog::load(store).await?;
//!
//! let snapshot = catalog.snapshot().await;
//! if let Some(collection) = snapshot.collections().by_name("Art") {
//!     println!("art has id {}", collection.id);
//! }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::error::CatalogError;

use super::model::{Collection, Storage};
use super::store::MediaStore;

// =============================================================================
// CollectionRegistry
// =============================================================================

/// Collections keyed by lower-cased name.
#[derive(Debug, Default)]
pub struct CollectionRegistry {
    by_name: HashMap<String, Collection>,
}

impl CollectionRegistry {
    /// Build the registry, rejecting names that collide after lowercasing.
    pub fn build(rows: Vec<Collection>) -> Result<Self, CatalogError> {
        let mut by_name: HashMap<String, Collection> = HashMap::with_capacity(rows.len());
        for collection in rows {
            let key = collection.name.to_lowercase();
            if let Some(existing) = by_name.get(&key) {
                return Err(CatalogError::DuplicateCollection {
                    name: key,
                    first: existing.id,
                    second: collection.id,
                });
            }
            by_name.insert(key, collection);
        }
        Ok(Self { by_name })
    }

    /// Case-insensitive lookup.
    pub fn by_name(&self, name: &str) -> Option<&Collection> {
        self.by_name.get(&name.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

// =============================================================================
// StorageRegistry
// =============================================================================

/// Storages keyed by id.
#[derive(Debug, Default)]
pub struct StorageRegistry {
    by_id: HashMap<i64, Storage>,
}

impl StorageRegistry {
    pub fn build(rows: Vec<Storage>) -> Self {
        Self {
            by_id: rows.into_iter().map(|s| (s.id, s)).collect(),
        }
    }

    pub fn by_id(&self, id: i64) -> Option<&Storage> {
        self.by_id.get(&id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

// =============================================================================
// CatalogSnapshot
// =============================================================================

/// One immutable generation of both registries.
#[derive(Debug)]
pub struct CatalogSnapshot {
    generation: u64,
    collections: CollectionRegistry,
    storages: StorageRegistry,
}

impl CatalogSnapshot {
    pub fn new(generation: u64, collections: CollectionRegistry, storages: StorageRegistry) -> Self {
        Self {
            generation,
            collections,
            storages,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn collections(&self) -> &CollectionRegistry {
        &self.collections
    }

    pub fn storages(&self) -> &StorageRegistry {
        &self.storages
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// Owner of the backing store and the current registry generation.
///
/// Many readers, one writer: `reload` calls are serialized and publish a new
/// generation with a single pointer swap.
pub struct Catalog<S: MediaStore> {
    store: S,
    current: RwLock<Arc<CatalogSnapshot>>,
    reload_lock: Mutex<()>,
    next_generation: AtomicU64,
}

impl<S: MediaStore> Catalog<S> {
    /// Load both registries from the store.
    ///
    /// Any failure here is a configuration fault; the gateway must not start
    /// with empty registries.
    pub async fn load(store: S) -> Result<Self, CatalogError> {
        let snapshot = build_snapshot(&store, 1).await?;
        info!(
            generation = 1,
            collections = snapshot.collections.len(),
            storages = snapshot.storages.len(),
            "Registries loaded"
        );

        Ok(Self {
            store,
            current: RwLock::new(Arc::new(snapshot)),
            reload_lock: Mutex::new(()),
            next_generation: AtomicU64::new(2),
        })
    }

    /// Rebuild both registries and swap them in.
    ///
    /// On failure the previous generation stays active. Returns the new
    /// generation number.
    pub async fn reload(&self) -> Result<u64, CatalogError> {
        let _writer = self.reload_lock.lock().await;
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);

        let snapshot = match build_snapshot(&self.store, generation).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(generation, "Registry reload failed, keeping previous generation: {}", e);
                return Err(e);
            }
        };

        info!(
            generation,
            collections = snapshot.collections.len(),
            storages = snapshot.storages.len(),
            "Registries reloaded"
        );

        *self.current.write().await = Arc::new(snapshot);
        Ok(generation)
    }

    /// The generation currently being served.
    pub async fn snapshot(&self) -> Arc<CatalogSnapshot> {
        Arc::clone(&*self.current.read().await)
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

async fn build_snapshot<S: MediaStore>(
    store: &S,
    generation: u64,
) -> Result<CatalogSnapshot, CatalogError> {
    let collections = CollectionRegistry::build(store.load_collections().await?)?;
    let storages = StorageRegistry::build(store.load_storages().await?);
    Ok(CatalogSnapshot::new(generation, collections, storages))
}

// =============================================================================
// Tests
// =============================================================================
