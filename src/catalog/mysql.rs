//! MySQL-backed [`MediaStore`].
//!
//! Reads the `collection`, `storage` and `fullcache` tables of the legacy
//! media database. The gateway never writes to them.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use tracing::debug;

use crate::error::StoreError;

use super::model::{ArtifactDescriptor, ArtifactKey, Collection, Storage};
use super::store::MediaStore;

const COLLECTIONS_QUERY: &str =
    "SELECT CAST(collectionid AS SIGNED) AS id, name FROM collection";

const STORAGES_QUERY: &str = "SELECT CAST(storageid AS SIGNED) AS id, name, filebase, jwtkey \
     FROM storage";

const ARTIFACT_QUERY: &str = "SELECT filebase, path, mimetype, jwtkey, \
     CAST(storageid AS SIGNED) AS storageid \
     FROM fullcache \
     WHERE collection_id = ? AND signature = ? AND action = ? AND param = ?";

/// Fallback content type for rows without a mime type.
const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

#[derive(sqlx::FromRow)]
struct CollectionRow {
    id: i64,
    name: String,
}

#[derive(sqlx::FromRow)]
struct StorageRow {
    id: i64,
    name: String,
    filebase: String,
    jwtkey: Option<String>,
}

#[derive(sqlx::FromRow)]
struct ArtifactRow {
    filebase: String,
    path: String,
    mimetype: Option<String>,
    jwtkey: Option<String>,
    storageid: i64,
}

/// [`MediaStore`] over a MySQL connection pool.
#[derive(Clone)]
pub struct SqlMediaStore {
    pool: MySqlPool,
}

impl SqlMediaStore {
    /// Open a pool and verify the database is reachable.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl MediaStore for SqlMediaStore {
    async fn load_collections(&self) -> Result<Vec<Collection>, StoreError> {
        let rows = sqlx::query_as::<_, CollectionRow>(COLLECTIONS_QUERY)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| Collection {
                id: row.id,
                name: row.name,
            })
            .collect())
    }

    async fn load_storages(&self) -> Result<Vec<Storage>, StoreError> {
        let rows = sqlx::query_as::<_, StorageRow>(STORAGES_QUERY)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| Storage {
                id: row.id,
                name: row.name,
                base_location: row.filebase,
                secret: row.jwtkey.filter(|k| !k.is_empty()),
            })
            .collect())
    }

    async fn find_artifact(
        &self,
        key: &ArtifactKey,
    ) -> Result<Option<ArtifactDescriptor>, StoreError> {
        debug!(key = %key, "Artifact lookup");

        let row = sqlx::query_as::<_, ArtifactRow>(ARTIFACT_QUERY)
            .bind(key.collection_id)
            .bind(&key.signature)
            .bind(&key.action)
            .bind(&key.params)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| ArtifactDescriptor {
            file_base: row.filebase,
            relative_path: row.path,
            mime_type: row
                .mimetype
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
            signing_key: row.jwtkey.filter(|k| !k.is_empty()),
            storage_id: row.storageid,
        }))
    }
}
