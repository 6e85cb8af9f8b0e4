//! Terminal behaviors of a media request.
//!
//! ```text
//!                      Resolution
//!                          │
//!        ┌─────────────────┼──────────────────────┐
//!        ▼                 ▼                      ▼
//!  Found, not IIIF    Found, IIIF             NotFound
//!        │                 │                      │
//!  ┌───────────┐    ┌──────────────┐     ┌────────────────┐
//!  │   local   │    │     iiif     │     │      fcgi      │
//!  │ ServeFile │    │ reverse proxy│     │ legacy backend │
//!  │ range/ims │    │ token re-sign│     │ CGI env + body │
//!  └───────────┘    └──────────────┘     └────────────────┘
//! ```

pub mod fcgi;
pub mod iiif;
pub mod local;

pub use fcgi::{BackendRequest, BackendResponse, FcgiAddress, FcgiBackend, FcgiTimeouts};
pub use iiif::{ClientContext, IiifProxy, IiifSettings};
pub use local::{ensure_file, serve_file};

/// Identifier sent as `Server` header and as the CGI `SERVER_SOFTWARE`.
pub const SERVER_SOFTWARE: &str = concat!("media-gateway/", env!("CARGO_PKG_VERSION"));
