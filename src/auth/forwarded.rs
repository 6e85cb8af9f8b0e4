//! The `<storageId>_<token>` segment carried across the IIIF hop.

use std::fmt;
use std::str::FromStr;

use crate::error::GatewayError;

/// Token placeholder for storages without a signing secret.
pub const OPEN_TOKEN: &str = "open";

/// A storage id paired with the token minted for the downstream path.
///
/// The image service hands this segment back on follow-up requests, so the
/// storage can be recovered without a second artifact lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedToken {
    pub storage_id: i64,
    pub token: String,
}

impl ForwardedToken {
    pub fn new(storage_id: i64, token: impl Into<String>) -> Self {
        Self {
            storage_id,
            token: token.into(),
        }
    }

    /// Forwarded token for a storage that needs no signature.
    pub fn open(storage_id: i64) -> Self {
        Self::new(storage_id, OPEN_TOKEN)
    }

    pub fn is_open(&self) -> bool {
        self.token == OPEN_TOKEN
    }
}

impl fmt::Display for ForwardedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.storage_id, self.token)
    }
}

impl FromStr for ForwardedToken {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(2, '_');
        let storage_id = parts
            .next()
            .and_then(|id| id.parse::<i64>().ok())
            .ok_or_else(|| {
                GatewayError::Forbidden(format!("Invalid token - no storage id: {}", s))
            })?;
        let token = parts.next().unwrap_or_default();

        Ok(Self::new(storage_id, token))
    }
}
