use thiserror::Error;

/// Errors raised by the backing store (database) behind the registries and
/// the artifact table.
///
/// A missing row is never a `StoreError`; lookups return `Ok(None)` for that.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Query failed or returned rows that could not be decoded
    #[error("Query error: {0}")]
    Query(String),

    /// Could not reach the database
    #[error("Connection error: {0}")]
    Connection(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(e) => StoreError::Connection(e.to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StoreError::Connection(err.to_string())
            }
            other => StoreError::Query(other.to_string()),
        }
    }
}

/// Errors that prevent the collection/storage registries from being built.
///
/// These are fatal at startup. On reload the previous generation is kept.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    /// The backing store failed while reading the registry tables
    #[error("Failed to load registries: {0}")]
    Store(#[from] StoreError),

    /// Two collections collapse onto the same lower-cased name
    #[error("Duplicate collection name after lowercasing: {name} (ids {first} and {second})")]
    DuplicateCollection { name: String, first: i64, second: i64 },
}

/// Per-request failure outcomes of the gateway.
///
/// Every variant maps to a well-formed HTTP response (see `server::handlers`).
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Nothing to serve for this request
    #[error("Not found: {0}")]
    NotFound(String),

    /// The artifact table points at a file that is not on disk
    #[error("Artifact file missing: {path}")]
    ArtifactMissing { path: String },

    /// Access denied (invalid token, foreign storage, folder access)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The artifact is signed but the request carries no token
    #[error("No access token")]
    MissingToken,

    /// Connection or transport failure towards the backend or the IIIF service
    #[error("Bad upstream {upstream}: {message}")]
    BadUpstream {
        upstream: &'static str,
        message: String,
    },

    /// The backend or the IIIF service did not answer in time
    #[error("Upstream {upstream} timed out after {seconds}s")]
    UpstreamTimeout { upstream: &'static str, seconds: u64 },

    /// Backing store query failed (distinct from a lookup miss)
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Anything else that prevents building a response
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Build a `BadUpstream` error for the named hop.
    pub fn upstream(upstream: &'static str, message: impl std::fmt::Display) -> Self {
        GatewayError::BadUpstream {
            upstream,
            message: message.to_string(),
        }
    }
}

impl From<crate::auth::TokenError> for GatewayError {
    fn from(err: crate::auth::TokenError) -> Self {
        match err {
            crate::auth::TokenError::Signing(_) => GatewayError::Internal(err.to_string()),
            _ => GatewayError::Forbidden(err.to_string()),
        }
    }
}
