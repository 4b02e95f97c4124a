//! BioKey Vault - Master Key Derivation
//!
//! PBKDF2-HMAC-SHA256 or Argon2id over the master password and the
//! application-wide salt.

use argon2::{Algorithm, Argon2, Params, Version};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::keys::{MasterKey, KEY_LEN};
use crate::error::{VaultError, VaultResult};

/// Lowest PBKDF2 iteration count accepted
pub const MIN_PBKDF2_ITERATIONS: u32 = 100_000;

/// Default application-wide salt
pub const DEFAULT_SALT: &str = "biokey_vault_salt_v1";

/// Password KDF selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KdfAlgorithm {
    Pbkdf2Sha256 {
        iterations: u32,
    },
    Argon2id {
        /// Memory in KiB
        memory_kib: u32,
        time_cost: u32,
        parallelism: u32,
    },
}

impl Default for KdfAlgorithm {
    fn default() -> Self {
        KdfAlgorithm::Pbkdf2Sha256 {
            iterations: MIN_PBKDF2_ITERATIONS,
        }
    }
}

/// KDF configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    pub algorithm: KdfAlgorithm,
    /// Fixed salt shared by the whole deployment
    pub salt: String,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            algorithm: KdfAlgorithm::default(),
            salt: DEFAULT_SALT.into(),
        }
    }
}

impl KdfConfig {
    /// Argon2id, 64 MiB / 3 passes / 4 lanes
    pub fn argon2id() -> Self {
        Self {
            algorithm: KdfAlgorithm::Argon2id {
                memory_kib: 64 * 1024,
                time_cost: 3,
                parallelism: 4,
            },
            ..Default::default()
        }
    }

    pub fn validate(&self) -> VaultResult<()> {
        if self.salt.len() < 8 {
            return Err(VaultError::Configuration("KDF salt must be at least 8 bytes".into()));
        }

        match self.algorithm {
            KdfAlgorithm::Pbkdf2Sha256 { iterations } if iterations < MIN_PBKDF2_ITERATIONS => {
                Err(VaultError::Configuration(format!(
                    "PBKDF2 iterations must be >= {}, got {}",
                    MIN_PBKDF2_ITERATIONS, iterations
                )))
            }
            KdfAlgorithm::Argon2id { memory_kib, time_cost, parallelism } => {
                Params::new(memory_kib, time_cost, parallelism, Some(KEY_LEN))
                    .map(|_| ())
                    .map_err(|e| VaultError::Configuration(format!("invalid Argon2 params: {}", e)))
            }
            _ => Ok(()),
        }
    }
}

/// Derive the store master key from a password
pub fn derive_master_key(password: &SecretString, config: &KdfConfig) -> VaultResult<MasterKey> {
    config.validate()?;

    let password = password.expose_secret().as_bytes();
    let salt = config.salt.as_bytes();
    let mut output = [0u8; KEY_LEN];

    match config.algorithm {
        KdfAlgorithm::Pbkdf2Sha256 { iterations } => {
            pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut output);
        }
        KdfAlgorithm::Argon2id { memory_kib, time_cost, parallelism } => {
            let params = Params::new(memory_kib, time_cost, parallelism, Some(KEY_LEN))
                .map_err(|e| VaultError::KeyDerivationFailed(e.to_string()))?;

            Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
                .hash_password_into(password, salt, &mut output)
                .map_err(|e| VaultError::KeyDerivationFailed(e.to_string()))?;
        }
    }

    let key = MasterKey::new(output);
    zeroize::Zeroize::zeroize(&mut output);
    Ok(key)
}
