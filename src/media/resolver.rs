//! Request → artifact resolution.
//!
//! # Lookup Flow
//!
//! ```text
//! MediaRequest
//!     │
//!     ├─ collection unknown ───────────────────────────▶ NotFound
//!     │
//!     ├─ action != iiif ─▶ (id, sig, action, sorted params)
//!     │                        hit ─▶ Found / miss ─▶ NotFound
//!     │
//!     └─ action == iiif ─▶ (id, sig, master, "")
//!                              hit + native mime ─▶ Found
//!                              miss | non-native ─▶ (id, sig, convert, formatpng)
//!                                                      hit ─▶ Found / miss ─▶ NotFound
//! ```

use std::sync::Arc;

use tracing::debug;

use crate::catalog::{ArtifactDescriptor, ArtifactKey, Catalog, MediaStore};
use crate::error::StoreError;

use super::formats::{IiifFormats, CONVERT_ACTION, CONVERT_PARAMS};
use super::request::MediaRequest;

/// Outcome of a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A precomputed artifact serves this request
    Found(ArtifactDescriptor),

    /// Nothing cached; the legacy backend has to produce it
    NotFound,
}

impl Resolution {
    pub fn is_found(&self) -> bool {
        matches!(self, Resolution::Found(_))
    }
}

/// Resolves requests against the registries and the artifact table.
pub struct ArtifactResolver<S: MediaStore> {
    catalog: Arc<Catalog<S>>,
    formats: IiifFormats,
}

impl<S: MediaStore> ArtifactResolver<S> {
    pub fn new(catalog: Arc<Catalog<S>>) -> Self {
        Self::with_formats(catalog, IiifFormats::default())
    }

    pub fn with_formats(catalog: Arc<Catalog<S>>, formats: IiifFormats) -> Self {
        Self { catalog, formats }
    }

    pub fn catalog(&self) -> &Arc<Catalog<S>> {
        &self.catalog
    }

    pub fn formats(&self) -> &IiifFormats {
        &self.formats
    }

    /// Resolve `request` to a cached artifact.
    ///
    /// A store failure is returned as an error and never reported as a miss.
    pub async fn resolve(&self, request: &MediaRequest) -> Result<Resolution, StoreError> {
        let snapshot = self.catalog.snapshot().await;
        let collection_id = match snapshot.collections().by_name(&request.collection) {
            Some(collection) => collection.id,
            None => {
                debug!(collection = %request.collection, "Unknown collection");
                return Ok(Resolution::NotFound);
            }
        };

        let key = request.lookup_key(collection_id);
        let primary = self.lookup(&key).await?;

        if !request.is_iiif() {
            return Ok(primary.map_or(Resolution::NotFound, Resolution::Found));
        }

        if let Some(master) = primary {
            if self.formats.is_native(&master.mime_type) {
                return Ok(Resolution::Found(master));
            }
            debug!(mime_type = %master.mime_type, "Master is not IIIF-native");
        }

        let converted = ArtifactKey::new(
            collection_id,
            &request.signature,
            CONVERT_ACTION,
            CONVERT_PARAMS,
        );
        Ok(self
            .lookup(&converted)
            .await?
            .map_or(Resolution::NotFound, Resolution::Found))
    }

    async fn lookup(&self, key: &ArtifactKey) -> Result<Option<ArtifactDescriptor>, StoreError> {
        let found = self.catalog.store().find_artifact(key).await?;
        if found.is_none() {
            debug!(key = %key, "Artifact not in cache table");
        }
        Ok(found)
    }
}
