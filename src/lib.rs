//! # Media Gateway
//!
//! A media delivery gateway in front of a legacy script-based media backend.
//!
//! For every request naming a collection, an object signature, an action and
//! its parameters, the gateway decides whether a previously computed artifact
//! can be served directly or whether the backend has to produce it.
//!
//! ## Features
//!
//! - **Cached artifacts**: served from disk with range and conditional support
//! - **IIIF proxy**: image requests are reverse-proxied to an IIIF service,
//!   with access tokens re-minted for the downstream hop
//! - **Backend fallback**: cache misses are forwarded over FastCGI
//! - **Signed access**: HMAC tokens bound to the requested resource path
//! - **Hot reload**: collection and storage registries swap atomically
//!
//! ## Architecture
//!
//! - [`catalog`] - Backing store, collection and storage registries
//! - [`auth`] - Token issue/verify and the forwarded-token format
//! - [`media`] - Request canonicalization and artifact resolution
//! - [`gateway`] - Local file serving, IIIF proxy, FastCGI backend
//! - [`server`] - Axum handlers and router
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use media_gateway::{
//!     create_router, AppState, ArtifactResolver, Catalog, FcgiAddress, FcgiBackend,
//!     IiifProxy, IiifSettings, RouterConfig, SqlMediaStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = SqlMediaStore::connect(
//!         "mysql://media@localhost/media",
//!         10,
//!         std::time::Duration::from_secs(5),
//!     )
//!     .await?;
//!     let catalog = Arc::new(Catalog::load(store).await?);
//!
//!     let state = AppState::new(
//!         ArtifactResolver::new(catalog),
//!         FcgiBackend::new(FcgiAddress::Tcp("127.0.0.1:9000".into()), "/srv/media/index.php"),
//!         IiifProxy::new(IiifSettings::default())?,
//!     );
//!     let _router = create_router(state, RouterConfig::new());
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod catalog;
pub mod config;
pub mod error;
pub mod gateway;
pub mod media;
pub mod server;

// Re-export commonly used types
pub use auth::{AccessToken, ForwardedToken, TokenAuthority, TokenError};
pub use catalog::{
    ArtifactDescriptor, ArtifactKey, Catalog, CatalogSnapshot, Collection, MediaStore,
    SqlMediaStore, Storage,
};
pub use config::{CheckConfig, Cli, Command, FcgiProto, ServeConfig, SignConfig, SignOutputFormat};
pub use error::{CatalogError, GatewayError, StoreError};
pub use gateway::{
    BackendRequest, BackendResponse, ClientContext, FcgiAddress, FcgiBackend, FcgiTimeouts,
    IiifProxy, IiifSettings, SERVER_SOFTWARE,
};
pub use media::{ArtifactResolver, IiifFormats, MediaRequest, Resolution};
pub use server::{create_router, AppState, RouterConfig};
