//! HTTP server layer of the media gateway.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │   GET /media/{collection}/{signature}/{action}/{params...}      │
//! │   GET /iiif/{storageId_token}/{file}/{params...}                │
//! │                                                                 │
//! │  ┌──────────────────────────┐  ┌─────────────────────────────┐  │
//! │  │        handlers          │  │          routes             │  │
//! │  │ (dispatch, authorization)│  │ (router, CORS, Server hdr)  │  │
//! │  └──────────────────────────┘  └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    health_handler, iiif_handler, media_handler, AppState, ErrorResponse, HealthResponse,
    IiifPathParams, MediaPathParams,
};
pub use routes::{create_router, RouterConfig, DEFAULT_IIIF_ALIAS, DEFAULT_MEDIA_ALIAS};
