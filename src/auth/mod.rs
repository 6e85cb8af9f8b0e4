//! Token authorization for media requests.
//!
//! ```text
//! inbound ?token=... | ?auth=...          outbound X-Forwarded-Path
//!        │                                         ▲
//!        ▼                                         │
//!  ┌──────────────┐   verify(subject)   ┌──────────┴───────┐
//!  │ AccessToken  │ ──────────────────▶ │  TokenAuthority  │
//!  └──────────────┘                     │  issue(subject)  │
//!                                       └──────────┬───────┘
//!                                                  ▼
//!                                    ForwardedToken "<storageId>_<token>"
//! ```

mod forwarded;
pub mod token;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use url::form_urlencoded;

pub use forwarded::{ForwardedToken, OPEN_TOKEN};
pub use token::{TokenAuthority, TokenError};

/// Query parameter names a token is accepted under, in priority order.
pub const TOKEN_PARAMS: [&str; 2] = ["token", "auth"];

/// Find the inbound token in a raw query string.
///
/// `token` wins over `auth`; within one name the first occurrence wins.
pub fn token_from_query(query: &str) -> Option<String> {
    TOKEN_PARAMS.iter().find_map(|name| {
        form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    })
}

/// Axum extractor for the optional inbound access token.
///
/// Never rejects: whether a token is required depends on the resolved
/// artifact, which the handler only knows after lookup.
#[derive(Debug, Clone, Default)]
pub struct AccessToken(pub Option<String>);

impl AccessToken {
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl<S> FromRequestParts<S> for AccessToken
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let query = parts.uri.query().unwrap_or("");
        Ok(AccessToken(token_from_query(query)))
    }
}
