//! Router configuration for the media gateway.
//!
//! # Route Structure
//!
//! ```text
//! /health                                                   - Health check
//! <media alias>/{collection}/{signature}/{action}[/{*params}] - Media request
//! <iiif alias>/{token}/{file}[/{*params}]                   - IIIF callback
//! ```
//!
//! Every response carries the `Server` identifier and the CORS allowance.
//!
//! # Example
//!
//! ```ignore
//! use media_gateway::server::{create_router, AppState, RouterConfig};
//!
//! let state = AppState::new(resolver, backend, iiif).with_sub_prefix("media/");
//! let router = create_router(state, RouterConfig::new());
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>()).await?;
//! ```

use std::time::Duration;

use axum::{routing::get, Router};
use http::header::{CONTENT_TYPE, RANGE, SERVER};
use http::{HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{health_handler, iiif_handler, media_handler, not_found_handler, AppState};
use crate::catalog::MediaStore;
use crate::gateway::SERVER_SOFTWARE;

/// Default public prefix of media requests.
pub const DEFAULT_MEDIA_ALIAS: &str = "/media";

/// Default public prefix of IIIF callbacks.
pub const DEFAULT_IIIF_ALIAS: &str = "/iiif";

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Route prefix of media requests
    pub media_alias: String,

    /// Route prefix of IIIF callbacks
    pub iiif_alias: String,

    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterConfig {
    /// Default aliases, any CORS origin, tracing on.
    pub fn new() -> Self {
        Self {
            media_alias: DEFAULT_MEDIA_ALIAS.to_string(),
            iiif_alias: DEFAULT_IIIF_ALIAS.to_string(),
            cors_origins: None,
            enable_tracing: true,
        }
    }

    pub fn with_media_alias(mut self, alias: impl Into<String>) -> Self {
        self.media_alias = alias.into();
        self
    }

    pub fn with_iiif_alias(mut self, alias: impl Into<String>) -> Self {
        self.iiif_alias = alias.into();
        self
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the main application router.
pub fn create_router<S>(state: AppState<S>, config: RouterConfig) -> Router
where
    S: MediaStore + 'static,
{
    let media = config.media_alias.trim_end_matches('/');
    let iiif = config.iiif_alias.trim_end_matches('/');

    let router = Router::new()
        .route("/health", get(health_handler::<S>))
        .route(
            &format!("{}/{{collection}}/{{signature}}/{{action}}", media),
            get(media_handler::<S>),
        )
        .route(
            &format!("{}/{{collection}}/{{signature}}/{{action}}/{{*params}}", media),
            get(media_handler::<S>),
        )
        .route(
            &format!("{}/{{token}}/{{file}}", iiif),
            get(iiif_handler::<S>),
        )
        .route(
            &format!("{}/{{token}}/{{file}}/{{*params}}", iiif),
            get(iiif_handler::<S>),
        )
        .fallback(not_found_handler)
        .with_state(state)
        .layer(SetResponseHeaderLayer::overriding(
            SERVER,
            HeaderValue::from_static(SERVER_SOFTWARE),
        ))
        .layer(build_cors_layer(&config));

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, RANGE])
        .max_age(Duration::from_secs(86400));

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<HeaderValue> =
                origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
