//! Canonical form of an inbound media request.

use crate::catalog::ArtifactKey;

/// Action name that selects the IIIF proxy path.
pub const IIIF_ACTION: &str = "iiif";

/// Action the IIIF path looks up and forwards to the backend.
pub const MASTER_ACTION: &str = "master";

/// `<collection>/<signature>/<action>/<params...>` as requested.
///
/// Parameters keep their request order for the downstream image service;
/// the cache key and the token subject use the sorted form so that order
/// never changes identity. Empty segments are dropped on construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRequest {
    pub collection: String,
    pub signature: String,
    pub action: String,
    params: Vec<String>,
}

impl MediaRequest {
    pub fn new<I, P>(
        collection: impl Into<String>,
        signature: impl Into<String>,
        action: impl Into<String>,
        params: I,
    ) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            collection: collection.into(),
            signature: signature.into(),
            action: action.into(),
            params: params
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.is_empty())
                .collect(),
        }
    }

    /// Build from the slash-separated parameter tail of a request path.
    pub fn from_path(collection: &str, signature: &str, action: &str, tail: &str) -> Self {
        Self::new(collection, signature, action, tail.split('/'))
    }

    pub fn is_iiif(&self) -> bool {
        self.action == IIIF_ACTION
    }

    /// Parameters in request order.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Parameters sorted lexicographically.
    pub fn sorted_params(&self) -> Vec<String> {
        let mut sorted = self.params.clone();
        sorted.sort();
        sorted
    }

    /// Canonical parameter string: sorted, joined with `/`.
    pub fn param_string(&self) -> String {
        self.sorted_params().join("/")
    }

    /// Request-order parameter string appended to downstream IIIF URLs.
    pub fn processing_params(&self) -> String {
        self.params.join("/")
    }

    /// Action used for the artifact lookup and the backend call.
    pub fn lookup_action(&self) -> &str {
        if self.is_iiif() {
            MASTER_ACTION
        } else {
            &self.action
        }
    }

    /// Primary artifact table key.
    ///
    /// IIIF requests map onto the unprocessed master with no parameters.
    pub fn lookup_key(&self, collection_id: i64) -> ArtifactKey {
        let params = if self.is_iiif() {
            String::new()
        } else {
            self.param_string()
        };
        ArtifactKey::new(collection_id, &self.signature, self.lookup_action(), params)
    }

    /// Subject a token for this resource must be bound to.
    ///
    /// Uses the action as requested, not the normalized lookup action.
    pub fn subject(&self, prefix: &str) -> String {
        let path = format!(
            "{}{}/{}/{}/{}",
            prefix,
            self.collection,
            self.signature,
            self.action,
            self.param_string()
        );
        path.trim_end_matches('/').to_lowercase()
    }
}

impl std::fmt::Display for MediaRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "/{}/{}/{}/{}",
            self.collection,
            self.signature,
            self.action,
            self.param_string()
        )
    }
}
