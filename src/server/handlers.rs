//! HTTP request handlers: the per-request dispatcher.
//!
//! # Endpoints
//!
//! - `GET <media alias>/{collection}/{signature}/{action}[/{params...}]` - Media request
//! - `GET <iiif alias>/{storageId_token}/{file}[/{params...}]` - IIIF callback
//! - `GET /health` - Health check endpoint
//!
//! # Dispatch
//!
//! ```text
//! resolve ──▶ Found ──▶ signing key? ──▶ token verifies? ──▶ local file | IIIF proxy
//!    │                      │ no                 │ no
//!    │                      ▼                    ▼
//!    │                 local file |          403 (no I/O)
//!    │                 IIIF proxy
//!    └──────▶ NotFound ──▶ FastCGI backend (token forwarded as-is)
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::auth::{AccessToken, ForwardedToken, TokenAuthority};
use crate::catalog::{ArtifactDescriptor, MediaStore};
use crate::error::GatewayError;
use crate::gateway::{local, BackendRequest, ClientContext, FcgiBackend, IiifProxy};
use crate::media::{ArtifactResolver, MediaRequest, Resolution};

// =============================================================================
// Application State
// =============================================================================

/// Shared state of the dispatcher.
pub struct AppState<S: MediaStore> {
    pub resolver: Arc<ArtifactResolver<S>>,
    pub backend: Arc<FcgiBackend>,
    pub iiif: Arc<IiifProxy>,
    pub authority: TokenAuthority,

    /// Prefix of every token subject
    pub sub_prefix: String,
}

impl<S: MediaStore> AppState<S> {
    pub fn new(resolver: ArtifactResolver<S>, backend: FcgiBackend, iiif: IiifProxy) -> Self {
        Self {
            resolver: Arc::new(resolver),
            backend: Arc::new(backend),
            iiif: Arc::new(iiif),
            authority: TokenAuthority::new(),
            sub_prefix: String::new(),
        }
    }

    pub fn with_sub_prefix(mut self, sub_prefix: impl Into<String>) -> Self {
        self.sub_prefix = sub_prefix.into();
        self
    }

    /// Enforce the artifact's token requirement.
    ///
    /// Runs before any file or upstream I/O for the request.
    fn authorize(
        &self,
        request: &MediaRequest,
        descriptor: &ArtifactDescriptor,
        token: Option<&str>,
    ) -> Result<(), GatewayError> {
        let Some(secret) = descriptor.signing_key.as_deref() else {
            return Ok(());
        };
        let token = token.ok_or(GatewayError::MissingToken)?;
        let subject = request.subject(&self.sub_prefix);
        self.authority.verify(token, secret, &subject)?;
        Ok(())
    }
}

impl<S: MediaStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            resolver: Arc::clone(&self.resolver),
            backend: Arc::clone(&self.backend),
            iiif: Arc::clone(&self.iiif),
            authority: self.authority.clone(),
            sub_prefix: self.sub_prefix.clone(),
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Path parameters of a media request.
#[derive(Debug, Deserialize)]
pub struct MediaPathParams {
    pub collection: String,
    pub signature: String,
    pub action: String,

    /// Slash-separated parameter tail (may be absent)
    #[serde(default)]
    pub params: String,
}

/// Path parameters of an IIIF callback.
#[derive(Debug, Deserialize)]
pub struct IiifPathParams {
    /// `<storageId>_<token>`
    pub token: String,

    /// Identifier with `$` as path separator
    pub file: String,

    #[serde(default)]
    pub params: String,
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "forbidden")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,

    /// Registry generation being served
    pub generation: u64,
    pub collections: usize,
    pub storages: usize,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Convert GatewayError to HTTP response.
///
/// 5xx are logged at ERROR, 404 at DEBUG, everything else at WARN.
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            GatewayError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            GatewayError::ArtifactMissing { .. } => (StatusCode::NOT_FOUND, "artifact_missing"),
            GatewayError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            GatewayError::MissingToken => (StatusCode::FORBIDDEN, "missing_token"),
            GatewayError::BadUpstream { .. } => (StatusCode::BAD_GATEWAY, "bad_upstream"),
            GatewayError::UpstreamTimeout { .. } => {
                (StatusCode::GATEWAY_TIMEOUT, "upstream_timeout")
            }
            GatewayError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_error"),
            GatewayError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        let message = self.to_string();

        if status.is_server_error() {
            error!(
                error_type = error_type,
                status = status.as_u16(),
                "Server error: {}",
                message
            );
        } else if status == StatusCode::NOT_FOUND {
            debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Resource not found: {}",
                message
            );
        } else {
            warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Client error: {}",
                message
            );
        }

        let error_response = ErrorResponse::with_status(error_type, message, status);
        (status, Json(error_response)).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle a media request.
///
/// # Endpoint
///
/// `GET <media alias>/{collection}/{signature}/{action}[/{params...}]`
///
/// # Query Parameters
///
/// - `token` or `auth`: access token (first one present wins)
///
/// # Response
///
/// - `200`/`206`/`304`: cached artifact, or whatever the IIIF service or the
///   backend answered
/// - `403 Forbidden`: token missing or invalid for a signed artifact
/// - `404 Not Found`: artifact row points at a missing file
/// - `502 Bad Gateway` / `504 Gateway Timeout`: upstream failure
pub async fn media_handler<S: MediaStore + 'static>(
    State(state): State<AppState<S>>,
    Path(params): Path<MediaPathParams>,
    token: AccessToken,
    request: Request,
) -> Result<Response, GatewayError> {
    let media = MediaRequest::from_path(
        &params.collection,
        &params.signature,
        &params.action,
        &params.params,
    );
    let remote_addr = remote_addr(&request);

    match state.resolver.resolve(&media).await? {
        Resolution::Found(descriptor) => {
            state.authorize(&media, &descriptor, token.as_deref())?;

            if media.is_iiif() {
                local::ensure_file(&descriptor.local_path()).await?;
                let client = ClientContext::from_request(
                    request.headers(),
                    remote_addr,
                    state.iiif.settings().default_port,
                );
                state
                    .iiif
                    .serve_artifact(&descriptor, &media.processing_params(), &client)
                    .await
            } else {
                local::serve_file(&descriptor, request).await
            }
        }
        Resolution::NotFound => {
            debug!(request = %media, "No cached artifact, forwarding to backend");
            let request_uri = request
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| request.uri().path().to_string());
            let backend_request = BackendRequest::new(&media, token.0).with_context(
                remote_addr,
                request.method().as_str(),
                request_uri,
                format!("{:?}", request.version()),
            );
            let response = state.backend.forward(&backend_request).await?;
            Ok(response.into_response())
        }
    }
}

/// Handle an IIIF callback carrying a forwarded token.
///
/// # Endpoint
///
/// `GET <iiif alias>/{storageId_token}/{file}[/{params...}]`
///
/// The storage named by the token must exist and contain the file; when it
/// has a secret, the token must verify for the file's subject. A fresh token
/// is minted for the next hop.
pub async fn iiif_handler<S: MediaStore + 'static>(
    State(state): State<AppState<S>>,
    Path(params): Path<IiifPathParams>,
    request: Request,
) -> Result<Response, GatewayError> {
    let forwarded: ForwardedToken = params.token.parse()?;

    let snapshot = state.resolver.catalog().snapshot().await;
    let storage = snapshot
        .storages()
        .by_id(forwarded.storage_id)
        .ok_or_else(|| {
            GatewayError::Forbidden(format!(
                "Invalid token - storage #{} not found",
                forwarded.storage_id
            ))
        })?;

    let filename = state.iiif.callback_filename(&params.file)?;
    let storage_path = storage.base_path();
    if !filename.starts_with(&storage_path) {
        return Err(GatewayError::Forbidden(format!(
            "Invalid storage #{} for file {} - {}",
            storage.id,
            filename.display(),
            storage_path.display()
        )));
    }

    let identifier = state.iiif.callback_identifier(&params.file)?;
    if let Some(secret) = storage.secret.as_deref() {
        let subject = state.iiif.subject(&identifier);
        state.authority.verify(&forwarded.token, secret, &subject)?;
    }

    let next_token = state
        .iiif
        .forwarded_token(storage.id, storage.secret.as_deref(), &identifier)?;
    let processing = params
        .params
        .split('/')
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    let client = ClientContext::from_request(
        request.headers(),
        remote_addr(&request),
        state.iiif.settings().default_port,
    );
    state
        .iiif
        .proxy(&identifier, &processing, &next_token, &client)
        .await
}

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
pub async fn health_handler<S: MediaStore + 'static>(
    State(state): State<AppState<S>>,
) -> Json<HealthResponse> {
    let snapshot = state.resolver.catalog().snapshot().await;
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        generation: snapshot.generation(),
        collections: snapshot.collections().len(),
        storages: snapshot.storages().len(),
    })
}

/// Fallback for unknown routes.
pub async fn not_found_handler(request: Request) -> GatewayError {
    GatewayError::NotFound(format!("No route for {}", request.uri().path()))
}

fn remote_addr(request: &Request) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

// =============================================================================
// Tests
// =============================================================================
