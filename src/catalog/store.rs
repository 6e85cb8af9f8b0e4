//! The backing store seam.
//!
//! Registries and the resolver only talk to the database through
//! [`MediaStore`], so tests can swap in an in-memory implementation.

use async_trait::async_trait;

use crate::error::StoreError;

use super::model::{ArtifactDescriptor, ArtifactKey, Collection, Storage};

/// Read access to the collection, storage and artifact tables.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Bulk read of every collection row.
    async fn load_collections(&self) -> Result<Vec<Collection>, StoreError>;

    /// Bulk read of every storage row.
    async fn load_storages(&self) -> Result<Vec<Storage>, StoreError>;

    /// Look up a precomputed artifact.
    ///
    /// Returns `Ok(None)` when no row matches; errors are reserved for
    /// query/connection failures.
    async fn find_artifact(
        &self,
        key: &ArtifactKey,
    ) -> Result<Option<ArtifactDescriptor>, StoreError>;
}

#[async_trait]
impl<T: MediaStore + ?Sized> MediaStore for std::sync::Arc<T> {
    async fn load_collections(&self) -> Result<Vec<Collection>, StoreError> {
        (**self).load_collections().await
    }

    async fn load_storages(&self) -> Result<Vec<Storage>, StoreError> {
        (**self).load_storages().await
    }

    async fn find_artifact(
        &self,
        key: &ArtifactKey,
    ) -> Result<Option<ArtifactDescriptor>, StoreError> {
        (**self).find_artifact(key).await
    }
}
