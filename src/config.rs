//! Configuration management for the media gateway.
//!
//! Every option can be given on the command line or through an environment
//! variable with the `MEDIA_` prefix:
//!
//! - `MEDIA_HOST` / `MEDIA_PORT` - Bind address (default: 0.0.0.0:8080)
//! - `MEDIA_DATABASE_URL` - MySQL URL of the media database (required)
//! - `MEDIA_DB_MAX_CONNECTIONS` - Pool size (default: 10)
//! - `MEDIA_ALIAS` - Route prefix of media requests (default: /media)
//! - `MEDIA_IIIF_ALIAS` - Route prefix of IIIF callbacks (default: /iiif)
//! - `MEDIA_IIIF_URL` - Base URL of the downstream IIIF service
//! - `MEDIA_IIIF_BASE` - Filesystem root of IIIF identifiers
//! - `MEDIA_FCGI_PROTO` - `tcp` or `unix` (default: tcp)
//! - `MEDIA_FCGI_ADDR` - Backend address or socket path
//! - `MEDIA_FCGI_SCRIPT` - Backend script filename
//! - `MEDIA_SUB_PREFIX` - Prefix of every token subject
//! - `MEDIA_TOKEN_TTL` - Lifetime of forwarded tokens in seconds (default: 7200)
//! - `MEDIA_CONNECT_TIMEOUT` / `MEDIA_UPSTREAM_TIMEOUT` / `MEDIA_IDLE_TIMEOUT`
//! - `MEDIA_CORS_ORIGINS` - Allowed CORS origins, comma-separated (default: any)
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use media_gateway::config::{Cli, Command};
//!
//! match Cli::parse().into_command() {
//!     Command::Serve(config) => println!("listening on {}", config.bind_address()),
//!     _ => {}
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::gateway::{FcgiAddress, FcgiTimeouts, IiifSettings};
use crate::server::{RouterConfig, DEFAULT_IIIF_ALIAS, DEFAULT_MEDIA_ALIAS};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default database pool size.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Default lifetime of forwarded tokens (2 hours).
pub const DEFAULT_TOKEN_TTL: u64 = 7200;

/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT: u64 = 5;

/// Default upstream response timeout in seconds.
pub const DEFAULT_UPSTREAM_TIMEOUT: u64 = 60;

/// Default per-chunk idle timeout in seconds.
pub const DEFAULT_IDLE_TIMEOUT: u64 = 30;

// =============================================================================
// CLI
// =============================================================================

/// Media gateway - serves cached media artifacts, proxies IIIF image
/// requests and forwards cache misses to the FastCGI media backend.
#[derive(Parser, Debug)]
#[command(name = "media-gateway")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the gateway
    Serve(ServeConfig),

    /// Mint an access token
    Sign(SignConfig),

    /// Connect to the database and load the registries
    Check(CheckConfig),
}

// =============================================================================
// Serve
// =============================================================================

/// FastCGI transport.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FcgiProto {
    #[default]
    Tcp,
    Unix,
}

#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "MEDIA_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "MEDIA_PORT")]
    pub port: u16,

    // =========================================================================
    // Database Configuration
    // =========================================================================
    /// MySQL URL of the media database.
    #[arg(long, env = "MEDIA_DATABASE_URL", default_value = "")]
    pub database_url: String,

    /// Maximum number of pooled database connections.
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS, env = "MEDIA_DB_MAX_CONNECTIONS")]
    pub db_max_connections: u32,

    // =========================================================================
    // Routing Configuration
    // =========================================================================
    /// Route prefix of media requests.
    #[arg(long = "alias", default_value = DEFAULT_MEDIA_ALIAS, env = "MEDIA_ALIAS")]
    pub media_alias: String,

    /// Route prefix of IIIF callbacks.
    #[arg(long, default_value = DEFAULT_IIIF_ALIAS, env = "MEDIA_IIIF_ALIAS")]
    pub iiif_alias: String,

    // =========================================================================
    // Upstream Configuration
    // =========================================================================
    /// Base URL of the downstream IIIF image service.
    #[arg(long, default_value = "http://127.0.0.1:8182/iiif/2", env = "MEDIA_IIIF_URL")]
    pub iiif_url: String,

    /// Filesystem root the IIIF service's identifiers are relative to.
    #[arg(long, default_value = "/", env = "MEDIA_IIIF_BASE")]
    pub iiif_base: String,

    /// Transport to the FastCGI backend.
    #[arg(long, value_enum, default_value_t = FcgiProto::Tcp, env = "MEDIA_FCGI_PROTO")]
    pub fcgi_proto: FcgiProto,

    /// Backend address (`host:port`) or socket path.
    #[arg(long, default_value = "127.0.0.1:9000", env = "MEDIA_FCGI_ADDR")]
    pub fcgi_addr: String,

    /// Script the backend runs for each request.
    #[arg(long, default_value = "", env = "MEDIA_FCGI_SCRIPT")]
    pub fcgi_script: String,

    // =========================================================================
    // Token Configuration
    // =========================================================================
    /// Prefix prepended to every token subject.
    #[arg(long, default_value = "", env = "MEDIA_SUB_PREFIX")]
    pub sub_prefix: String,

    /// Lifetime of tokens minted for the IIIF hop, in seconds.
    #[arg(long, default_value_t = DEFAULT_TOKEN_TTL, env = "MEDIA_TOKEN_TTL")]
    pub token_ttl: u64,

    // =========================================================================
    // Timeouts
    // =========================================================================
    /// Connect timeout towards both upstreams, in seconds.
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT, env = "MEDIA_CONNECT_TIMEOUT")]
    pub connect_timeout: u64,

    /// Time allowed until an upstream starts answering, in seconds.
    #[arg(long, default_value_t = DEFAULT_UPSTREAM_TIMEOUT, env = "MEDIA_UPSTREAM_TIMEOUT")]
    pub upstream_timeout: u64,

    /// Longest pause between two body chunks, in seconds.
    #[arg(long, default_value_t = DEFAULT_IDLE_TIMEOUT, env = "MEDIA_IDLE_TIMEOUT")]
    pub idle_timeout: u64,

    // =========================================================================
    // CORS Configuration
    // =========================================================================
    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "MEDIA_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            database_url: String::new(),
            db_max_connections: DEFAULT_MAX_CONNECTIONS,
            media_alias: DEFAULT_MEDIA_ALIAS.to_string(),
            iiif_alias: DEFAULT_IIIF_ALIAS.to_string(),
            iiif_url: "http://127.0.0.1:8182/iiif/2".to_string(),
            iiif_base: "/".to_string(),
            fcgi_proto: FcgiProto::Tcp,
            fcgi_addr: "127.0.0.1:9000".to_string(),
            fcgi_script: String::new(),
            sub_prefix: String::new(),
            token_ttl: DEFAULT_TOKEN_TTL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            cors_origins: None,
            verbose: false,
            no_tracing: false,
        }
    }
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.database_url.is_empty() {
            return Err(
                "Database URL is required. Set --database-url or MEDIA_DATABASE_URL".to_string(),
            );
        }

        validate_alias("alias", &self.media_alias)?;
        validate_alias("iiif_alias", &self.iiif_alias)?;
        if self.media_alias.trim_end_matches('/') == self.iiif_alias.trim_end_matches('/') {
            return Err("alias and iiif_alias must differ".to_string());
        }

        url::Url::parse(&self.iiif_url)
            .map_err(|e| format!("iiif_url is not a valid URL: {}", e))?;

        if self.fcgi_addr.is_empty() {
            return Err("fcgi_addr must not be empty".to_string());
        }

        if self.db_max_connections == 0 {
            return Err("db_max_connections must be greater than 0".to_string());
        }
        if self.token_ttl == 0 {
            return Err("token_ttl must be greater than 0".to_string());
        }
        if self.connect_timeout == 0 || self.upstream_timeout == 0 || self.idle_timeout == 0 {
            return Err("timeouts must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn fcgi_address(&self) -> FcgiAddress {
        match self.fcgi_proto {
            FcgiProto::Tcp => FcgiAddress::Tcp(self.fcgi_addr.clone()),
            FcgiProto::Unix => FcgiAddress::Unix(PathBuf::from(&self.fcgi_addr)),
        }
    }

    pub fn fcgi_timeouts(&self) -> FcgiTimeouts {
        FcgiTimeouts {
            connect: Duration::from_secs(self.connect_timeout),
            response: Duration::from_secs(self.upstream_timeout),
            idle: Duration::from_secs(self.idle_timeout),
        }
    }

    pub fn iiif_settings(&self) -> IiifSettings {
        IiifSettings {
            url: self.iiif_url.clone(),
            local_base: self.iiif_base.clone(),
            alias: self.iiif_alias.clone(),
            sub_prefix: self.sub_prefix.clone(),
            token_ttl: Duration::from_secs(self.token_ttl),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            response_timeout: Duration::from_secs(self.upstream_timeout),
            idle_timeout: Duration::from_secs(self.idle_timeout),
            default_port: self.port,
        }
    }

    pub fn router_config(&self) -> RouterConfig {
        let mut config = RouterConfig::new()
            .with_media_alias(&self.media_alias)
            .with_iiif_alias(&self.iiif_alias)
            .with_tracing(!self.no_tracing);
        if let Some(origins) = &self.cors_origins {
            config = config.with_cors_origins(origins.clone());
        }
        config
    }
}

fn validate_alias(name: &str, alias: &str) -> Result<(), String> {
    if !alias.starts_with('/') {
        return Err(format!("{} must start with '/': {}", name, alias));
    }
    if alias.trim_end_matches('/').is_empty() {
        return Err(format!("{} must not be the root path", name));
    }
    if alias.contains('{') || alias.contains('}') {
        return Err(format!("{} must not contain braces: {}", name, alias));
    }
    Ok(())
}

// =============================================================================
// Sign
// =============================================================================

/// Output format of `sign`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignOutputFormat {
    /// The bare token
    #[default]
    Token,

    /// Token, subject and expiry as JSON
    Json,
}

#[derive(Args, Debug, Clone)]
pub struct SignConfig {
    /// Signing secret (storage or artifact key).
    #[arg(long, env = "MEDIA_SIGN_SECRET")]
    pub secret: String,

    /// Subject the token is bound to, e.g. `media/art/abc/master`.
    #[arg(long)]
    pub subject: String,

    /// Token lifetime in seconds.
    #[arg(long, default_value_t = DEFAULT_TOKEN_TTL)]
    pub ttl: u64,

    #[arg(long, value_enum, default_value_t = SignOutputFormat::Token)]
    pub format: SignOutputFormat,
}

impl SignConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.secret.is_empty() {
            return Err("secret must not be empty".to_string());
        }
        if self.subject.is_empty() {
            return Err("subject must not be empty".to_string());
        }
        if self.ttl == 0 {
            return Err("ttl must be greater than 0".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Check
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct CheckConfig {
    /// MySQL URL of the media database.
    #[arg(long, env = "MEDIA_DATABASE_URL")]
    pub database_url: String,

    /// Print every collection and storage.
    #[arg(long, default_value_t = false)]
    pub list: bool,

    /// Enable verbose logging.
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

// =============================================================================
// Tests
// =============================================================================
