//! FastCGI client for the legacy media backend.
//!
//! Cache misses are handed to the backend script as a single RESPONDER
//! request per connection:
//!
//! ```text
//! gateway                                   backend
//!   │ BEGIN_REQUEST (role=RESPONDER) ─────────▶ │
//!   │ PARAMS (CGI environment) ... PARAMS("") ─▶ │
//!   │ STDIN("") ──────────────────────────────▶ │
//!   │ ◀───────────── STDOUT (CGI headers, body) │
//!   │ ◀──────────────────────── STDERR (logged) │
//!   │ ◀────────────────────────── END_REQUEST   │
//! ```
//!
//! Every record starts with an 8-byte header:
//!
//! ```text
//! version:u8=1 | type:u8 | request_id:u16be | content_len:u16be | padding:u8 | reserved:u8
//! ```
//!
//! The record codec is public so that tests can stand up a responder.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};
use url::form_urlencoded;

use crate::error::GatewayError;
use crate::media::MediaRequest;

use super::SERVER_SOFTWARE;

const UPSTREAM: &str = "backend";

// =============================================================================
// Record Codec
// =============================================================================

/// Protocol version carried in every record header.
pub const FCGI_VERSION: u8 = 1;

/// Size of a record header.
pub const HEADER_LEN: usize = 8;

/// Largest content a single record can carry.
pub const MAX_CONTENT_LEN: usize = u16::MAX as usize;

/// `role` field of BEGIN_REQUEST for a responder.
pub const ROLE_RESPONDER: u16 = 1;

/// Request id used for the one request sent per connection.
const REQUEST_ID: u16 = 1;

/// Upper bound on the CGI header block returned by the backend.
const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Content type assumed when the backend sends none.
pub const DEFAULT_CONTENT_TYPE: &str = "text/html";

/// FastCGI record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    BeginRequest,
    AbortRequest,
    EndRequest,
    Params,
    Stdin,
    Stdout,
    Stderr,
    Data,
    GetValues,
    GetValuesResult,
    Unknown(u8),
}

impl RecordType {
    pub fn as_u8(self) -> u8 {
        match self {
            RecordType::BeginRequest => 1,
            RecordType::AbortRequest => 2,
            RecordType::EndRequest => 3,
            RecordType::Params => 4,
            RecordType::Stdin => 5,
            RecordType::Stdout => 6,
            RecordType::Stderr => 7,
            RecordType::Data => 8,
            RecordType::GetValues => 9,
            RecordType::GetValuesResult => 10,
            RecordType::Unknown(value) => value,
        }
    }
}

impl From<u8> for RecordType {
    fn from(value: u8) -> Self {
        match value {
            1 => RecordType::BeginRequest,
            2 => RecordType::AbortRequest,
            3 => RecordType::EndRequest,
            4 => RecordType::Params,
            5 => RecordType::Stdin,
            6 => RecordType::Stdout,
            7 => RecordType::Stderr,
            8 => RecordType::Data,
            9 => RecordType::GetValues,
            10 => RecordType::GetValuesResult,
            other => RecordType::Unknown(other),
        }
    }
}

/// One decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub record_type: RecordType,
    pub request_id: u16,
    pub content: Bytes,
}

/// Write one record, padding the content to an 8-byte boundary.
pub async fn write_record<W>(
    writer: &mut W,
    record_type: RecordType,
    request_id: u16,
    content: &[u8],
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if content.len() > MAX_CONTENT_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("record content too large: {} bytes", content.len()),
        ));
    }

    let content_len = content.len() as u16;
    let padding = ((8 - content.len() % 8) % 8) as u8;
    let [id_hi, id_lo] = request_id.to_be_bytes();
    let [len_hi, len_lo] = content_len.to_be_bytes();

    let mut frame = Vec::with_capacity(HEADER_LEN + content.len() + padding as usize);
    frame.extend_from_slice(&[
        FCGI_VERSION,
        record_type.as_u8(),
        id_hi,
        id_lo,
        len_hi,
        len_lo,
        padding,
        0,
    ]);
    frame.extend_from_slice(content);
    frame.resize(frame.len() + padding as usize, 0);

    writer.write_all(&frame).await
}

/// Write a stream, split into records no larger than [`MAX_CONTENT_LEN`].
///
/// An empty `content` writes nothing; callers terminate streams with an
/// explicit empty record.
pub async fn write_stream<W>(
    writer: &mut W,
    record_type: RecordType,
    request_id: u16,
    content: &[u8],
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    for chunk in content.chunks(MAX_CONTENT_LEN) {
        write_record(writer, record_type, request_id, chunk).await?;
    }
    Ok(())
}

/// Read one record. Returns `None` on a clean end of stream.
pub async fn read_record<R>(reader: &mut R) -> io::Result<Option<Record>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    if header[0] != FCGI_VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported FastCGI version {}", header[0]),
        ));
    }

    let request_id = u16::from_be_bytes([header[2], header[3]]);
    let content_len = u16::from_be_bytes([header[4], header[5]]) as usize;
    let padding = header[6] as usize;

    let mut content = vec![0u8; content_len];
    reader.read_exact(&mut content).await?;
    if padding > 0 {
        let mut skip = [0u8; 255];
        reader.read_exact(&mut skip[..padding]).await?;
    }

    Ok(Some(Record {
        record_type: RecordType::from(header[1]),
        request_id,
        content: Bytes::from(content),
    }))
}

/// BEGIN_REQUEST body.
pub fn begin_request_body(role: u16, keep_conn: bool) -> [u8; 8] {
    let [role_hi, role_lo] = role.to_be_bytes();
    [role_hi, role_lo, keep_conn as u8, 0, 0, 0, 0, 0]
}

/// END_REQUEST body.
pub fn end_request_body(app_status: u32, protocol_status: u8) -> [u8; 8] {
    let [a, b, c, d] = app_status.to_be_bytes();
    [a, b, c, d, protocol_status, 0, 0, 0]
}

/// Encode name-value pairs for a PARAMS stream.
///
/// Lengths under 128 take one byte; longer ones take four with the high
/// bit set.
pub fn encode_params<K, V>(pairs: &[(K, V)]) -> Vec<u8>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut buf = Vec::new();
    for (name, value) in pairs {
        let (name, value) = (name.as_ref().as_bytes(), value.as_ref().as_bytes());
        encode_length(&mut buf, name.len());
        encode_length(&mut buf, value.len());
        buf.extend_from_slice(name);
        buf.extend_from_slice(value);
    }
    buf
}

fn encode_length(buf: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        buf.push(len as u8);
    } else {
        buf.extend_from_slice(&((len as u32) | 0x8000_0000).to_be_bytes());
    }
}

/// Decode a complete PARAMS stream.
pub fn decode_params(mut bytes: &[u8]) -> io::Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    while !bytes.is_empty() {
        let name_len = decode_length(&mut bytes)?;
        let value_len = decode_length(&mut bytes)?;
        if bytes.len() < name_len + value_len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated name-value pair",
            ));
        }
        let name = String::from_utf8_lossy(&bytes[..name_len]).into_owned();
        let value = String::from_utf8_lossy(&bytes[name_len..name_len + value_len]).into_owned();
        bytes = &bytes[name_len + value_len..];
        pairs.push((name, value));
    }
    Ok(pairs)
}

fn decode_length(bytes: &mut &[u8]) -> io::Result<usize> {
    let truncated = || io::Error::new(io::ErrorKind::UnexpectedEof, "truncated length");
    let first = *bytes.first().ok_or_else(truncated)?;
    if first & 0x80 == 0 {
        *bytes = &bytes[1..];
        return Ok(first as usize);
    }
    if bytes.len() < 4 {
        return Err(truncated());
    }
    let len = u32::from_be_bytes([first & 0x7f, bytes[1], bytes[2], bytes[3]]) as usize;
    *bytes = &bytes[4..];
    Ok(len)
}

// =============================================================================
// Backend Request / Response
// =============================================================================

/// Where the backend listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FcgiAddress {
    Tcp(String),
    Unix(PathBuf),
}

impl std::fmt::Display for FcgiAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FcgiAddress::Tcp(addr) => write!(f, "tcp://{}", addr),
            FcgiAddress::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// A cache miss as handed to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendRequest {
    pub collection: String,
    pub signature: String,

    /// Normalized action (`master` for IIIF requests)
    pub action: String,

    /// Sorted, non-empty parameters
    pub params: Vec<String>,

    /// Inbound token, forwarded verbatim
    pub token: Option<String>,

    pub remote_addr: Option<SocketAddr>,
    pub request_uri: String,
    pub method: String,
    pub protocol: String,
}

impl BackendRequest {
    pub fn new(request: &MediaRequest, token: Option<String>) -> Self {
        Self {
            collection: request.collection.clone(),
            signature: request.signature.clone(),
            action: request.lookup_action().to_string(),
            params: request.sorted_params(),
            token,
            remote_addr: None,
            request_uri: request.to_string(),
            method: "GET".to_string(),
            protocol: "HTTP/1.1".to_string(),
        }
    }

    /// Attach the inbound request context.
    pub fn with_context(
        mut self,
        remote_addr: Option<SocketAddr>,
        method: impl Into<String>,
        request_uri: impl Into<String>,
        protocol: impl Into<String>,
    ) -> Self {
        self.remote_addr = remote_addr;
        self.method = method.into();
        self.request_uri = request_uri.into();
        self.protocol = protocol.into();
        self
    }

    /// Form-encoded query string, keys in sorted order.
    pub fn query_string(&self) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        query.append_pair("action", &self.action);
        query.append_pair("collection", &self.collection);
        for param in self.params.iter().filter(|p| !p.is_empty()) {
            query.append_pair("params[]", param);
        }
        query.append_pair("signature", &self.signature);
        if let Some(token) = &self.token {
            query.append_pair("token", token);
        }
        query.finish()
    }
}

/// The backend's answer: CGI status and headers, then a streamed body.
pub struct BackendResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

impl BackendResponse {
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }
}

impl IntoResponse for BackendResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(self.body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

// =============================================================================
// FcgiBackend
// =============================================================================

trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection for T {}

type BoxedConnection = Pin<Box<dyn Connection>>;

/// Timeouts applied to each backend exchange.
#[derive(Debug, Clone, Copy)]
pub struct FcgiTimeouts {
    /// Establishing the connection
    pub connect: Duration,

    /// From sending the request until the CGI headers are complete
    pub response: Duration,

    /// Between two body records
    pub idle: Duration,
}

impl Default for FcgiTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            response: Duration::from_secs(60),
            idle: Duration::from_secs(30),
        }
    }
}

/// FastCGI client for the legacy backend.
///
/// One connection per request; no retries, since backend generation is not
/// known to be idempotent.
#[derive(Debug, Clone)]
pub struct FcgiBackend {
    address: FcgiAddress,
    script: String,
    timeouts: FcgiTimeouts,
}

impl FcgiBackend {
    pub fn new(address: FcgiAddress, script: impl Into<String>) -> Self {
        Self {
            address,
            script: script.into(),
            timeouts: FcgiTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: FcgiTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn address(&self) -> &FcgiAddress {
        &self.address
    }

    /// CGI environment for `request`.
    pub fn environment(&self, request: &BackendRequest) -> Vec<(String, String)> {
        let (remote_addr, remote_port) = match request.remote_addr {
            Some(addr) => (addr.ip().to_string(), addr.port().to_string()),
            None => (String::new(), String::new()),
        };

        [
            ("AUTH_TYPE", String::new()),
            ("SCRIPT_FILENAME", self.script.clone()),
            ("SERVER_SOFTWARE", SERVER_SOFTWARE.to_string()),
            ("REMOTE_ADDR", remote_addr),
            ("REMOTE_PORT", remote_port),
            ("QUERY_STRING", request.query_string()),
            ("HOME", "/".to_string()),
            ("HTTPS", "on".to_string()),
            ("REQUEST_SCHEME", "https".to_string()),
            ("SERVER_PROTOCOL", request.protocol.clone()),
            ("REQUEST_METHOD", request.method.clone()),
            ("FCGI_ROLE", "RESPONDER".to_string()),
            ("REQUEST_URI", request.request_uri.clone()),
            ("GATEWAY_INTERFACE", "CGI/1.1".to_string()),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
    }

    /// Forward `request` and return the backend's response.
    ///
    /// Resolves once the CGI headers are in; the body streams afterwards.
    pub async fn forward(&self, request: &BackendRequest) -> Result<BackendResponse, GatewayError> {
        debug!(backend = %self.address, query = %request.query_string(), "Forwarding to backend");

        let mut conn = self.connect().await?;

        let exchange = async {
            self.send(&mut conn, request).await.map_err(|e| {
                GatewayError::upstream(UPSTREAM, format!("write to {} failed: {}", self.address, e))
            })?;
            read_head(&mut conn).await
        };

        let (status, headers, leftover) = timeout(self.timeouts.response, exchange)
            .await
            .map_err(|_| GatewayError::UpstreamTimeout {
                upstream: UPSTREAM,
                seconds: self.timeouts.response.as_secs(),
            })??;

        let body = stream_body(conn, leftover, self.timeouts.idle);
        Ok(BackendResponse {
            status,
            headers,
            body,
        })
    }

    async fn connect(&self) -> Result<BoxedConnection, GatewayError> {
        let connecting = async {
            let conn: BoxedConnection = match &self.address {
                FcgiAddress::Tcp(addr) => Box::pin(TcpStream::connect(addr).await?),
                #[cfg(unix)]
                FcgiAddress::Unix(path) => Box::pin(tokio::net::UnixStream::connect(path).await?),
                #[cfg(not(unix))]
                FcgiAddress::Unix(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::Unsupported,
                        "unix sockets are not supported on this platform",
                    ))
                }
            };
            Ok::<_, io::Error>(conn)
        };

        match timeout(self.timeouts.connect, connecting).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(GatewayError::upstream(
                UPSTREAM,
                format!("unable to connect to {}: {}", self.address, e),
            )),
            Err(_) => Err(GatewayError::UpstreamTimeout {
                upstream: UPSTREAM,
                seconds: self.timeouts.connect.as_secs(),
            }),
        }
    }

    async fn send(&self, conn: &mut BoxedConnection, request: &BackendRequest) -> io::Result<()> {
        write_record(
            conn,
            RecordType::BeginRequest,
            REQUEST_ID,
            &begin_request_body(ROLE_RESPONDER, false),
        )
        .await?;
        let params = encode_params(&self.environment(request));
        write_stream(conn, RecordType::Params, REQUEST_ID, &params).await?;
        write_record(conn, RecordType::Params, REQUEST_ID, &[]).await?;
        write_record(conn, RecordType::Stdin, REQUEST_ID, &[]).await?;
        conn.flush().await
    }
}

/// Read STDOUT until the CGI header block is complete.
///
/// Returns the status, the headers and any body bytes read past them.
async fn read_head(
    conn: &mut BoxedConnection,
) -> Result<(StatusCode, HeaderMap, Bytes), GatewayError> {
    let mut buf = BytesMut::new();

    loop {
        if let Some((head_len, sep_len)) = find_header_end(&buf) {
            let head = buf.split_to(head_len);
            let _ = buf.split_to(sep_len);
            let (status, headers) = parse_cgi_headers(&head)?;
            return Ok((status, headers, buf.freeze()));
        }
        if buf.len() > MAX_HEADER_BYTES {
            return Err(GatewayError::upstream(UPSTREAM, "response headers too large"));
        }

        let record = read_record(conn)
            .await
            .map_err(|e| GatewayError::upstream(UPSTREAM, format!("read failed: {}", e)))?;
        match record {
            Some(record) => match record.record_type {
                RecordType::Stdout => buf.extend_from_slice(&record.content),
                RecordType::Stderr => log_stderr(&record.content),
                RecordType::EndRequest => {
                    return Err(GatewayError::upstream(
                        UPSTREAM,
                        "request ended before response headers",
                    ))
                }
                _ => {}
            },
            None => {
                return Err(GatewayError::upstream(
                    UPSTREAM,
                    "connection closed before response headers",
                ))
            }
        }
    }
}

fn find_header_end(buf: &[u8]) -> Option<(usize, usize)> {
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n");
    let lf = buf.windows(2).position(|w| w == b"\n\n");
    match (crlf, lf) {
        (Some(c), Some(l)) if l < c => Some((l, 2)),
        (Some(c), _) => Some((c, 4)),
        (None, Some(l)) => Some((l, 2)),
        (None, None) => None,
    }
}

/// Parse a CGI header block. `Status` sets the HTTP status; the content
/// type defaults to `text/html`.
fn parse_cgi_headers(head: &[u8]) -> Result<(StatusCode, HeaderMap), GatewayError> {
    let text = String::from_utf8_lossy(head);
    let mut status = StatusCode::OK;
    let mut headers = HeaderMap::new();

    for line in text.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
        let (name, value) = line.split_once(':').ok_or_else(|| {
            GatewayError::upstream(UPSTREAM, format!("malformed header line: {}", line))
        })?;
        let value = value.trim();

        if name.eq_ignore_ascii_case("status") {
            status = value
                .split_whitespace()
                .next()
                .and_then(|code| code.parse::<u16>().ok())
                .and_then(|code| StatusCode::from_u16(code).ok())
                .ok_or_else(|| {
                    GatewayError::upstream(UPSTREAM, format!("invalid status: {}", value))
                })?;
            continue;
        }

        match (
            HeaderName::from_bytes(name.trim().as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => warn!(header = %line, "Dropping invalid backend header"),
        }
    }

    if !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
    }

    Ok((status, headers))
}

fn log_stderr(content: &[u8]) {
    let message = String::from_utf8_lossy(content);
    let message = message.trim_end();
    if !message.is_empty() {
        warn!(upstream = UPSTREAM, "Backend stderr: {}", message);
    }
}

/// Stream the remaining STDOUT records as the response body.
///
/// Dropping the body (client went away) drops the connection with it.
fn stream_body(mut conn: BoxedConnection, leftover: Bytes, idle: Duration) -> Body {
    let stream = async_stream::stream! {
        if !leftover.is_empty() {
            yield Ok::<Bytes, io::Error>(leftover);
        }

        loop {
            let record = match timeout(idle, read_record(&mut conn)).await {
                Ok(Ok(record)) => record,
                Ok(Err(e)) => {
                    warn!(upstream = UPSTREAM, "Backend stream failed: {}", e);
                    yield Err(e);
                    break;
                }
                Err(_) => {
                    warn!(upstream = UPSTREAM, "Backend stream idle for {:?}", idle);
                    yield Err(io::Error::new(io::ErrorKind::TimedOut, "backend idle timeout"));
                    break;
                }
            };

            match record {
                Some(record) => match record.record_type {
                    RecordType::Stdout if !record.content.is_empty() => yield Ok(record.content),
                    RecordType::Stderr => log_stderr(&record.content),
                    RecordType::EndRequest => break,
                    _ => {}
                },
                None => break,
            }
        }
    };

    Body::from_stream(stream)
}

// =============================================================================
// Tests
// =============================================================================
