//! Node credential issuance and verification.
//!
//! Node tokens are high-entropy random strings shown exactly once at
//! issuance; only an adaptive salted hash (bcrypt, fixed cost) is stored.
//! Verification is a pure predicate: a malformed stored hash yields `false`,
//! never an error.
//!
//! The process-wide admin secret is compared directly (it is never hashed
//! and stored), so that path uses a constant-time equality check instead of
//! the bcrypt path.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};

/// Fixed bcrypt cost for token hashes.
///
/// Brute-forcing a leaked hash stays computationally expensive; changing
/// the cost only affects newly issued tokens (the cost is embedded in each
/// stored hash).
pub const BCRYPT_COST: u32 = 12;

/// Minimum token entropy in bytes (256 bits).
pub const MIN_TOKEN_BYTES: usize = 32;

/// Token issuance configuration.
#[derive(Debug, Clone, Copy)]
pub struct TokenConfig {
    /// Number of random bytes per issued token. Clamped to at least
    /// [`MIN_TOKEN_BYTES`].
    pub token_bytes: usize,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            token_bytes: MIN_TOKEN_BYTES,
        }
    }
}

/// Issues and verifies node credentials.
///
/// Pure value object; safe to clone and share across request handlers.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenAuthenticator {
    config: TokenConfig,
}

impl TokenAuthenticator {
    /// Creates an authenticator with the given configuration.
    #[must_use]
    pub fn new(config: TokenConfig) -> Self {
        Self { config }
    }

    /// Generates a new URL-safe random token.
    ///
    /// The caller must hand the plaintext to the operator exactly once and
    /// persist only [`TokenAuthenticator::hash`] of it.
    #[must_use]
    pub fn issue(&self) -> String {
        let len = self.config.token_bytes.max(MIN_TOKEN_BYTES);
        let mut bytes = vec![0u8; len];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Hashes a token for storage.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the hash computation fails (out of
    /// memory or similar; not input-dependent).
    pub fn hash(&self, token: &str) -> Result<String> {
        bcrypt::hash(token, BCRYPT_COST)
            .map_err(|e| Error::Internal(format!("token hashing failed: {e}")))
    }

    /// Verifies a presented token against a stored hash.
    ///
    /// Returns `false` for a non-matching token and for a malformed stored
    /// hash; this function never fails.
    #[must_use]
    pub fn verify(&self, presented: &str, stored_hash: &str) -> bool {
        bcrypt::verify(presented, stored_hash).unwrap_or(false)
    }
}

/// Compares a presented secret against the configured admin secret in
/// constant time.
#[must_use]
pub fn verify_admin_key(presented: &str, configured: &str) -> bool {
    // `ct_eq` on slices of unequal length short-circuits on the length
    // check only; the length of the admin secret is not sensitive.
    presented.as_bytes().ct_eq(configured.as_bytes()).into()
}
