//! Reverse proxy to the downstream IIIF image service.
//!
//! The local artifact path is rewritten into the image service's identifier
//! scheme: each path segment is percent-encoded and the segments are joined
//! with `%24` (an escaped `$`). A fresh token is minted for the downstream path and sent back to the
//! image service in `X-Forwarded-Path`, next to the storage id:
//!
//! ```text
//! /data/iiif/art/abc.png  +  full/max/0/default.png
//!          │
//!          ▼
//! GET <iiif url>/art%24abc.png/full/max/0/default.png
//!     X-Forwarded-Proto: https
//!     X-Forwarded-Host:  media.example
//!     X-Forwarded-Port:  443
//!     X-Forwarded-For:   203.0.113.7
//!     X-Forwarded-Path:  /iiif/3_<token | open>/
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use crate::auth::{ForwardedToken, TokenAuthority};
use crate::catalog::{single_joining_slash, ArtifactDescriptor};
use crate::error::GatewayError;

const UPSTREAM: &str = "iiif";

/// Escaped form of the identifier path separator.
const ESCAPED_SEPARATOR: &str = "%24";

const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_PORT: &str = "x-forwarded-port";
const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_PATH: &str = "x-forwarded-path";

/// Downstream headers copied onto the proxied response.
const PASSTHROUGH_HEADERS: [HeaderName; 5] = [
    CONTENT_TYPE,
    http::header::CONTENT_LENGTH,
    http::header::CACHE_CONTROL,
    http::header::LAST_MODIFIED,
    http::header::ETAG,
];

// =============================================================================
// Settings
// =============================================================================

/// Configuration of the IIIF hop.
#[derive(Debug, Clone)]
pub struct IiifSettings {
    /// Base URL of the image service
    pub url: String,

    /// Filesystem root the image service's identifiers are relative to
    pub local_base: String,

    /// Public route prefix of the callback endpoint (e.g. `/iiif`)
    pub alias: String,

    /// Prefix prepended to every token subject
    pub sub_prefix: String,

    /// Lifetime of minted downstream tokens
    pub token_ttl: Duration,

    pub connect_timeout: Duration,
    pub response_timeout: Duration,

    /// Longest pause tolerated between two body chunks
    pub idle_timeout: Duration,

    /// Port reported when the inbound Host header carries none
    pub default_port: u16,
}

impl Default for IiifSettings {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8182/iiif/2".to_string(),
            local_base: "/".to_string(),
            alias: "/iiif".to_string(),
            sub_prefix: String::new(),
            token_ttl: Duration::from_secs(7200),
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(30),
            default_port: 80,
        }
    }
}

// =============================================================================
// Client Context
// =============================================================================

/// What the image service is told about the original client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    pub proto: String,
    pub host: String,
    pub port: u16,
    pub client_ip: Option<IpAddr>,
}

impl ClientContext {
    /// Derive protocol, host and port from the inbound request.
    ///
    /// The port comes from the `Host` header when present, else
    /// `default_port`. The protocol honours an inbound `X-Forwarded-Proto`.
    pub fn from_request(
        headers: &HeaderMap,
        remote_addr: Option<SocketAddr>,
        default_port: u16,
    ) -> Self {
        let proto = headers
            .get(X_FORWARDED_PROTO)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .unwrap_or("http")
            .to_string();

        let host_header = headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let (host, port) = split_host_port(host_header, default_port);

        Self {
            proto,
            host,
            port,
            client_ip: remote_addr.map(|addr| addr.ip()),
        }
    }
}

fn split_host_port(host: &str, default_port: u16) -> (String, u16) {
    match host.rsplit_once(':') {
        Some((name, port)) if !name.is_empty() => match port.parse::<u16>() {
            Ok(port) => (name.to_string(), port),
            Err(_) => (host.to_string(), default_port),
        },
        _ => (host.to_string(), default_port),
    }
}

// =============================================================================
// IiifProxy
// =============================================================================

/// Reverse proxy for IIIF image requests.
#[derive(Debug, Clone)]
pub struct IiifProxy {
    client: reqwest::Client,
    settings: IiifSettings,
    authority: TokenAuthority,
}

impl IiifProxy {
    pub fn new(settings: IiifSettings) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|e| GatewayError::Internal(format!("Cannot build IIIF client: {}", e)))?;

        Ok(Self {
            client,
            settings,
            authority: TokenAuthority::new(),
        })
    }

    pub fn settings(&self) -> &IiifSettings {
        &self.settings
    }

    /// Image service identifier of a local file.
    ///
    /// The local base is stripped (whole components only) and the remaining
    /// segments are percent-encoded and joined with the escaped separator.
    pub fn identifier(&self, local_path: &Path) -> String {
        let relative = local_path
            .strip_prefix(&self.settings.local_base)
            .unwrap_or(local_path);
        let segments: Vec<String> = relative
            .components()
            .filter_map(|component| match component {
                Component::Normal(segment) => Some(segment.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        join_segments(segments.iter().map(String::as_str))
    }

    /// Local filename of a callback identifier (`$`-separated).
    ///
    /// Empty, `.` and `..` segments are refused, so the result never leaves
    /// the directory it names.
    pub fn callback_filename(&self, file: &str) -> Result<PathBuf, GatewayError> {
        let mut path = PathBuf::from(&self.settings.local_base);
        for segment in callback_segments(file)? {
            path.push(segment);
        }
        Ok(path)
    }

    /// Image service identifier of a callback file (`$`-separated).
    pub fn callback_identifier(&self, file: &str) -> Result<String, GatewayError> {
        Ok(join_segments(callback_segments(file)?))
    }

    /// Subject a token for `identifier` carries.
    pub fn subject(&self, identifier: &str) -> String {
        format!("{}{}", self.settings.sub_prefix, identifier)
            .trim_end_matches('/')
            .to_lowercase()
    }

    /// Mint the forwarded token for `identifier`.
    ///
    /// Storages without a secret get the literal `open`.
    pub fn forwarded_token(
        &self,
        storage_id: i64,
        secret: Option<&str>,
        identifier: &str,
    ) -> Result<ForwardedToken, GatewayError> {
        match secret {
            Some(secret) => {
                let token = self.authority.issue(
                    secret,
                    &self.subject(identifier),
                    self.settings.token_ttl,
                )?;
                Ok(ForwardedToken::new(storage_id, token))
            }
            None => Ok(ForwardedToken::open(storage_id)),
        }
    }

    /// Downstream URL for `identifier` and the processing parameters.
    pub fn downstream_url(&self, identifier: &str, params: &str) -> String {
        let path = if params.is_empty() {
            identifier.to_string()
        } else {
            single_joining_slash(identifier, params)
        };
        single_joining_slash(&self.settings.url, &path)
    }

    /// Value of `X-Forwarded-Path` for `token`.
    pub fn forwarded_path(&self, token: &ForwardedToken) -> String {
        format!(
            "{}/",
            single_joining_slash(&self.settings.alias, &token.to_string())
        )
    }

    /// Proxy a resolved IIIF artifact.
    pub async fn serve_artifact(
        &self,
        descriptor: &ArtifactDescriptor,
        params: &str,
        client: &ClientContext,
    ) -> Result<Response, GatewayError> {
        let identifier = self.identifier(&descriptor.local_path());
        let token = self.forwarded_token(
            descriptor.storage_id,
            descriptor.signing_key.as_deref(),
            &identifier,
        )?;
        self.proxy(&identifier, params, &token, client).await
    }

    /// Issue the downstream GET and stream the answer back.
    ///
    /// Status, content type and caching headers pass through unchanged.
    pub async fn proxy(
        &self,
        identifier: &str,
        params: &str,
        token: &ForwardedToken,
        client: &ClientContext,
    ) -> Result<Response, GatewayError> {
        let url = self.downstream_url(identifier, params);
        debug!(url = %url, storage_id = token.storage_id, "Proxying IIIF request");

        let mut request = self
            .client
            .get(&url)
            .header(X_FORWARDED_PROTO, &client.proto)
            .header(X_FORWARDED_HOST, &client.host)
            .header(X_FORWARDED_PORT, client.port.to_string())
            .header(X_FORWARDED_PATH, self.forwarded_path(token));
        if let Some(ip) = client.client_ip {
            request = request.header(X_FORWARDED_FOR, ip.to_string());
        }

        let seconds = self.settings.response_timeout.as_secs();
        let upstream = match timeout(self.settings.response_timeout, request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) if e.is_timeout() => {
                return Err(GatewayError::UpstreamTimeout {
                    upstream: UPSTREAM,
                    seconds,
                })
            }
            Ok(Err(e)) => {
                return Err(GatewayError::upstream(
                    UPSTREAM,
                    format!("error calling {}: {}", url, e),
                ))
            }
            Err(_) => {
                return Err(GatewayError::UpstreamTimeout {
                    upstream: UPSTREAM,
                    seconds,
                })
            }
        };

        let status = StatusCode::from_u16(upstream.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        let mut headers = HeaderMap::new();
        for name in PASSTHROUGH_HEADERS.iter() {
            if let Some(value) = upstream.headers().get(name) {
                if let Ok(value) = HeaderValue::from_bytes(value.as_bytes()) {
                    headers.insert(name.clone(), value);
                }
            }
        }

        let mut response = Response::new(stream_body(upstream, self.settings.idle_timeout));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Split a callback file on `$`, refusing segments that walk the tree.
fn callback_segments(file: &str) -> Result<Vec<&str>, GatewayError> {
    let segments: Vec<&str> = file.split('$').collect();
    let walks =
        |segment: &&str| matches!(*segment, "" | "." | "..") || segment.contains(['/', '\\']);
    if segments.iter().any(walks) {
        return Err(GatewayError::Forbidden(format!(
            "Invalid file identifier {}",
            file
        )));
    }
    Ok(segments)
}

fn join_segments<'a>(segments: impl IntoIterator<Item = &'a str>) -> String {
    segments
        .into_iter()
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join(ESCAPED_SEPARATOR)
}

/// Body that forwards downstream chunks, failing after `idle` of silence.
///
/// Dropping the body (client went away) drops the downstream response.
fn stream_body(upstream: reqwest::Response, idle: Duration) -> Body {
    let stream = async_stream::stream! {
        let mut chunks = Box::pin(upstream.bytes_stream());
        loop {
            match timeout(idle, chunks.next()).await {
                Ok(Some(Ok(chunk))) => yield Ok::<Bytes, std::io::Error>(chunk),
                Ok(Some(Err(e))) => {
                    warn!(upstream = UPSTREAM, "IIIF stream failed: {}", e);
                    yield Err(std::io::Error::other(e.to_string()));
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(upstream = UPSTREAM, "IIIF stream idle for {:?}", idle);
                    yield Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "IIIF idle timeout",
                    ));
                    break;
                }
            }
        }
    };

    Body::from_stream(stream)
}

// =============================================================================
// Tests
// =============================================================================
