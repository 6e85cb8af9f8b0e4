//! Serving precomputed artifacts from the local filesystem.

use std::io::ErrorKind;
use std::path::Path;

use axum::body::Body;
use axum::extract::Request;
use axum::response::Response;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, warn};

use crate::catalog::ArtifactDescriptor;
use crate::error::GatewayError;

/// Check that `path` names a regular file.
///
/// A missing file means the artifact table is stale and is reported as
/// [`GatewayError::ArtifactMissing`]; directories are refused.
pub async fn ensure_file(path: &Path) -> Result<(), GatewayError> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(path = %path.display(), "Artifact row points at a missing file");
            return Err(GatewayError::ArtifactMissing {
                path: path.display().to_string(),
            });
        }
        Err(e) => {
            return Err(GatewayError::Forbidden(format!(
                "Cannot stat file {}: {}",
                path.display(),
                e
            )))
        }
    };

    if metadata.is_dir() {
        return Err(GatewayError::Forbidden(format!(
            "Access to folder {} denied",
            path.display()
        )));
    }
    Ok(())
}

/// Stream the artifact behind `descriptor`.
///
/// Range, `If-Modified-Since` and HEAD are answered from the inbound
/// request's headers.
pub async fn serve_file(
    descriptor: &ArtifactDescriptor,
    request: Request,
) -> Result<Response, GatewayError> {
    let path = descriptor.local_path();
    ensure_file(&path).await?;

    let mime = content_type(&descriptor.mime_type);

    debug!(path = %path.display(), mime_type = %descriptor.mime_type, "Serving artifact");

    let response = match ServeFile::new_with_mime(&path, &mime).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };

    Ok(response.map(Body::new))
}

/// Parse a stored mime type, falling back to `application/octet-stream`.
fn content_type(mime_type: &str) -> mime::Mime {
    mime_type
        .trim()
        .parse()
        .unwrap_or(mime::APPLICATION_OCTET_STREAM)
}
