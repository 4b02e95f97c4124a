//! BioKey Vault - Key Material
//!
//! Payload keys, the store master key, and nonce generation.

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use zeroize::Zeroizing;

use crate::error::{VaultError, VaultResult};

/// Key length for AES-256 / XChaCha20
pub const KEY_LEN: usize = 32;

/// Nonce length for AES-GCM
pub const NONCE_LEN: usize = 12;

/// Nonce length for XChaCha20
pub const XCHACHA_NONCE_LEN: usize = 24;

/// HKDF contexts for subkey derivation
pub mod contexts {
    /// Payload encryption subkey
    pub const PAYLOAD_ENC: &[u8] = b"BIOKEY:PAYLOAD:ENC:v1";

    /// Payload key-commitment subkey
    pub const PAYLOAD_COMMIT: &[u8] = b"BIOKEY:PAYLOAD:COMMIT:v1";

    /// Store encryption subkey
    pub const STORE: &[u8] = b"BIOKEY:STORE:v1";
}

/// 256-bit symmetric key, zeroized on drop
pub struct SymmetricKey {
    inner: Secret<[u8; KEY_LEN]>,
}

impl SymmetricKey {
    /// Create a key from bytes
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            inner: Secret::new(bytes),
        }
    }

    /// Expose the key bytes (use with caution)
    pub fn expose(&self) -> &[u8; KEY_LEN] {
        self.inner.expose_secret()
    }

    /// Generate a random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::new(bytes)
    }

    /// Encode for the store file
    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(STANDARD.encode(self.expose()))
    }

    /// Decode a store entry
    pub fn from_base64(encoded: &str) -> VaultResult<Self> {
        let decoded = Zeroizing::new(STANDARD.decode(encoded)?);
        let bytes: [u8; KEY_LEN] = decoded.as_slice().try_into().map_err(|_| {
            VaultError::CorruptStore(format!(
                "key length: expected {}, got {}",
                KEY_LEN,
                decoded.len()
            ))
        })?;
        Ok(Self::new(bytes))
    }
}

impl Clone for SymmetricKey {
    fn clone(&self) -> Self {
        Self::new(*self.expose())
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey([REDACTED])")
    }
}

/// Key protecting the vault store at rest
#[derive(Clone, Debug)]
pub struct MasterKey(SymmetricKey);

impl MasterKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(SymmetricKey::new(bytes))
    }

    pub fn key(&self) -> &SymmetricKey {
        &self.0
    }
}

/// Generate a random nonce for AES-GCM
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Generate a random nonce for XChaCha20
pub fn generate_xchacha_nonce() -> [u8; XCHACHA_NONCE_LEN] {
    let mut nonce = [0u8; XCHACHA_NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}
