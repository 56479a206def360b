//! Invitation keys: issue once, persist only a slow salted hash.
//!
//! A plaintext key has two halves, `{selector}.{secret}`. The selector is a
//! random public handle used to find the record when the caller has no id;
//! it carries no authority. The whole plaintext is hashed with Argon2id and a
//! per-record salt, so holding the selector alone proves nothing.

use anyhow::{anyhow, Result};
use argon2::password_hash::rand_core::OsRng as SaltRng;
use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;

const SELECTOR_BYTES: usize = 12;
const SECRET_BYTES: usize = 32;

/// Argon2 cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenHashParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for TokenHashParams {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

/// A freshly issued key. `plaintext` goes into the resolution URLs and is
/// then dropped; only `selector` and `hash` are persisted.
#[derive(Clone)]
pub struct IssuedToken {
    pub plaintext: String,
    pub selector: String,
    pub hash: String,
}

impl std::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("selector", &self.selector)
            .field("plaintext", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct TokenService {
    argon2: Argon2<'static>,
}

impl TokenService {
    pub fn new(params: TokenHashParams) -> Result<Self> {
        let params = Params::new(
            params.memory_kib,
            params.iterations,
            params.parallelism,
            None,
        )
        .map_err(|e| anyhow!("Invalid token hash parameters: {}", e))?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    /// Draw a new key (96-bit selector, 256-bit secret) and hash it.
    pub fn issue(&self) -> Result<IssuedToken> {
        let mut selector = [0u8; SELECTOR_BYTES];
        let mut secret = [0u8; SECRET_BYTES];
        OsRng.fill_bytes(&mut selector);
        OsRng.fill_bytes(&mut secret);

        let selector = hex::encode(selector);
        let plaintext = format!("{}.{}", selector, URL_SAFE_NO_PAD.encode(secret));
        let hash = self.hash_secret(&plaintext)?;

        Ok(IssuedToken {
            plaintext,
            selector,
            hash,
        })
    }

    /// Check a plaintext key against a stored hash.
    ///
    /// The comparison of derived outputs is constant-time. A malformed stored
    /// hash never verifies.
    pub fn verify(&self, plaintext: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };
        self.argon2
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok()
    }

    /// One-way hash of any secret (keys, invitee credentials) as a PHC string.
    pub fn hash_secret(&self, secret: &str) -> Result<String> {
        let salt = SaltString::generate(&mut SaltRng);
        self.argon2
            .hash_password(secret.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| anyhow!("Failed to hash secret: {}", e))
    }

    /// Public lookup half of a plaintext key, if the key is well-formed.
    pub fn selector_of(plaintext: &str) -> Option<&str> {
        let (selector, secret) = plaintext.split_once('.')?;
        let well_formed = selector.len() == SELECTOR_BYTES * 2
            && selector.chars().all(|c| c.is_ascii_hexdigit())
            && !secret.is_empty();
        well_formed.then_some(selector)
    }
}
