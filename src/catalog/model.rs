//! Row types shared by the store, the registries and the resolver.

use std::path::PathBuf;

use url::Url;

/// A named collection. Looked up case-insensitively by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub id: i64,
    pub name: String,
}

/// A storage location objects are rooted under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Storage {
    pub id: i64,
    pub name: String,

    /// Base location as stored (usually a `file://` URI)
    pub base_location: String,

    /// Shared signing secret for objects under this storage
    pub secret: Option<String>,
}

impl Storage {
    /// Filesystem path of the base location.
    pub fn base_path(&self) -> PathBuf {
        location_path(&self.base_location)
    }
}

/// Key of the artifact table: one row per computed rendition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub collection_id: i64,
    pub signature: String,
    pub action: String,
    pub params: String,
}

impl ArtifactKey {
    pub fn new(
        collection_id: i64,
        signature: impl Into<String>,
        action: impl Into<String>,
        params: impl Into<String>,
    ) -> Self {
        Self {
            collection_id,
            signature: signature.into(),
            action: action.into(),
            params: params.into(),
        }
    }
}

impl std::fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}]/{}/{}/{}",
            self.collection_id, self.signature, self.action, self.params
        )
    }
}

/// A precomputed artifact, retrievable at `file_base + relative_path`.
///
/// Fetched per request and used only for the request that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    pub file_base: String,
    pub relative_path: String,
    pub mime_type: String,

    /// Secret tokens for this artifact must be signed with
    pub signing_key: Option<String>,
    pub storage_id: i64,
}

impl ArtifactDescriptor {
    /// Full location: base and relative path joined by a single slash.
    pub fn location(&self) -> String {
        single_joining_slash(&self.file_base, &self.relative_path)
    }

    /// Filesystem path of the artifact.
    pub fn local_path(&self) -> PathBuf {
        location_path(&self.location())
    }
}

/// Join two path fragments with exactly one `/` between them.
pub fn single_joining_slash(a: &str, b: &str) -> String {
    format!("{}/{}", a.trim_end_matches('/'), b.trim_start_matches('/'))
}

/// Resolve a stored location (URI or plain path) to a filesystem path.
fn location_path(location: &str) -> PathBuf {
    match Url::parse(location) {
        Ok(url) if url.scheme() == "file" => url
            .to_file_path()
            .unwrap_or_else(|_| PathBuf::from(decode_path(url.path()))),
        Ok(url) => PathBuf::from(decode_path(url.path())),
        Err(_) => PathBuf::from(location),
    }
}

fn decode_path(path: &str) -> String {
    urlencoding::decode(path)
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| path.to_string())
}
