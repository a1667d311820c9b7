//! Argon2id key derivation.

use crate::error::{CofferError, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

/// Derived key length in bytes (AES-256)
pub const KEY_LENGTH: usize = 32;

/// Salt length in bytes
pub const SALT_LENGTH: usize = KEY_LENGTH * 2;

/// Tunable Argon2id cost parameters, persisted per archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argon2Params {
    /// Number of passes over memory
    pub iterations: u32,
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Lanes of parallelism
    pub parallelism: u32,
}

impl Default for Argon2Params {
    fn default() -> Self {
        Self {
            iterations: 10,
            memory_kib: 65536,
            parallelism: 4,
        }
    }
}

/// Derive a 256-bit key from a password and salt.
pub fn derive_key(password: &str, salt: &[u8], params: &Argon2Params) -> Result<[u8; KEY_LENGTH]> {
    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_LENGTH),
    )
    .map_err(|e| CofferError::Crypto(format!("invalid Argon2 parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);
    let mut key = [0u8; KEY_LENGTH];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| CofferError::Crypto(format!("key derivation failed: {}", e)))?;
    Ok(key)
}

/// Generate a fresh random salt.
///
/// A fixed seed produces a deterministic salt, which keeps archive creation
/// reproducible in tests.
pub fn generate_salt(seed: Option<[u8; 32]>) -> [u8; SALT_LENGTH] {
    let mut salt = [0u8; SALT_LENGTH];
    match seed {
        Some(seed) => StdRng::from_seed(seed).fill_bytes(&mut salt),
        None => OsRng.fill_bytes(&mut salt),
    }
    salt
}
