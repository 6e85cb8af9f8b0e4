//! Signed, subject-bound access tokens.
//!
//! Tokens are HS256 JWTs, so the downstream image service and the legacy
//! backend can validate them with any JWT library:
//!
//! ```text
//! header = {"typ":"JWT","alg":"HS256"}
//! claims = {"sub":"<lower-cased subject>","exp":<unix seconds>}
//! ```
//!
//! # Security Properties
//!
//! - **Algorithm pinning**: only the HMAC family (HS256, HS384, HS512) is
//!   accepted; `none` and asymmetric algorithms are rejected
//! - **Subject binding**: a token minted for one resource path does not
//!   verify for another
//! - **Time-limited**: tokens must carry an `exp` claim
//!
//! # Example
//!
//! ```rust
//! use media_gateway::auth::TokenAuthority;
//! use std::time::Duration;
//!
//! let authority = TokenAuthority::new();
//! let token = authority
//!     .issue("secret", "Art/abc/master", Duration::from_secs(60))
//!     .unwrap();
//!
//! assert!(authority.verify(&token, "secret", "art/abc/master").is_ok());
//! assert!(authority.verify(&token, "other", "art/abc/master").is_err());
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Algorithms a token header may name.
const ACCEPTED_ALGORITHMS: [Algorithm; 3] = [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

// =============================================================================
// Types
// =============================================================================

/// Why a token could not be issued or verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Not a compact JWT, or undecodable header or claims
    Malformed(String),

    /// Header names a non-HMAC algorithm
    UnexpectedAlgorithm(String),

    /// Signature does not verify under the secret
    InvalidSignature,

    /// Token has expired
    Expired,

    /// Token lacks a usable `sub` or `exp` claim
    MissingClaim(String),

    /// Token was minted for a different resource
    SubjectMismatch { actual: String, expected: String },

    /// Token could not be signed
    Signing(String),
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Malformed(reason) => write!(f, "Malformed token: {}", reason),
            TokenError::UnexpectedAlgorithm(alg) => {
                write!(f, "Unexpected signing method: {}", alg)
            }
            TokenError::InvalidSignature => write!(f, "Invalid token signature"),
            TokenError::Expired => write!(f, "Token has expired"),
            TokenError::MissingClaim(claim) => write!(f, "Token has no {} claim", claim),
            TokenError::SubjectMismatch { actual, expected } => {
                write!(f, "Invalid subject [{}]. Should be [{}]", actual, expected)
            }
            TokenError::Signing(reason) => write!(f, "Cannot sign token: {}", reason),
        }
    }
}

impl std::error::Error for TokenError {}

/// Claims carried by every token.
///
/// Both are optional on the way in so a missing claim is reported as such
/// rather than as undecodable JSON.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exp: Option<u64>,
}

// =============================================================================
// TokenAuthority
// =============================================================================

/// Issues and verifies subject-bound tokens.
///
/// The authority holds no key material: every call names the secret, since
/// secrets live on artifacts and storages.
#[derive(Debug, Clone, Default)]
pub struct TokenAuthority {
    /// Clock skew tolerated when checking `exp`
    leeway: u64,
}

impl TokenAuthority {
    pub fn new() -> Self {
        Self { leeway: 0 }
    }

    /// Tolerate `leeway` of clock skew on expiry checks.
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway.as_secs();
        self
    }

    /// Issue an HS256 token for `subject` valid for `ttl`.
    pub fn issue(&self, secret: &str, subject: &str, ttl: Duration) -> Result<String, TokenError> {
        self.issue_with_expiry(secret, subject, now() + ttl.as_secs())
    }

    /// Issue an HS256 token with an explicit expiry timestamp.
    pub fn issue_with_expiry(
        &self,
        secret: &str,
        subject: &str,
        expiry: u64,
    ) -> Result<String, TokenError> {
        let claims = Claims {
            sub: Some(subject.to_lowercase()),
            exp: Some(expiry),
        };

        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Verify `token` under `secret` for `expected_subject`.
    ///
    /// Signature, algorithm and expiry are checked by the decoder; the
    /// subject comparison is case-insensitive.
    pub fn verify(
        &self,
        token: &str,
        secret: &str,
        expected_subject: &str,
    ) -> Result<(), TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = ACCEPTED_ALGORITHMS.to_vec();
        validation.leeway = self.leeway;
        validation.validate_exp = true;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp"]);

        let data = jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map_err(|e| classify(token, e))?;

        let subject = data
            .claims
            .sub
            .ok_or_else(|| TokenError::MissingClaim("sub".to_string()))?;
        if subject.to_lowercase() != expected_subject.to_lowercase() {
            return Err(TokenError::SubjectMismatch {
                actual: subject,
                expected: expected_subject.to_lowercase(),
            });
        }

        Ok(())
    }
}

fn classify(token: &str, err: jsonwebtoken::errors::Error) -> TokenError {
    match err.kind() {
        ErrorKind::InvalidSignature => TokenError::InvalidSignature,
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::MissingRequiredClaim(claim) => TokenError::MissingClaim(claim.clone()),
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
            let alg = jsonwebtoken::decode_header(token)
                .map(|header| format!("{:?}", header.alg))
                .unwrap_or_else(|_| "unknown".to_string());
            TokenError::UnexpectedAlgorithm(alg)
        }
        _ => TokenError::Malformed(err.to_string()),
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// =============================================================================
// Tests
// =============================================================================
