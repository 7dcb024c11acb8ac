//! Shared-secret API key check.

use crate::error::{SecurityError, SecurityResult};
use subtle::ConstantTimeEq;
use tracing::warn;

/// Compares the caller's key with the configured secret, byte for byte.
#[derive(Clone)]
pub struct CredentialGate {
    secret: Option<String>,
}

impl CredentialGate {
    /// An empty secret counts as unset, so an empty key can never match.
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    pub fn check(&self, presented: &str) -> SecurityResult<()> {
        let Some(secret) = &self.secret else {
            warn!("No API key configured; rejecting request");
            return Err(SecurityError::Unauthorized);
        };

        if bool::from(secret.as_bytes().ct_eq(presented.as_bytes())) {
            Ok(())
        } else {
            Err(SecurityError::Unauthorized)
        }
    }
}

impl std::fmt::Debug for CredentialGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialGate")
            .field("configured", &self.is_configured())
            .finish()
    }
}
