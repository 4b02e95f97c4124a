//! BioKey Vault - AEAD Encryption
//!
//! AES-256-GCM for payloads, XChaCha20-Poly1305 for the key store.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::keys::{generate_nonce, generate_xchacha_nonce, SymmetricKey, NONCE_LEN, XCHACHA_NONCE_LEN};
use crate::error::{VaultError, VaultResult};

/// Authentication tag length shared by both ciphers
pub const TAG_LEN: usize = 16;

/// HMAC-SHA256 output length
pub const HMAC_LEN: usize = 32;

/// Encrypted data with its nonce
pub struct EncryptedData {
    /// Nonce (12 or 24 bytes depending on cipher)
    pub nonce: Vec<u8>,
    /// Ciphertext with authentication tag
    pub ciphertext: Vec<u8>,
}

impl EncryptedData {
    /// Serialize to bytes (nonce || ciphertext)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(self.nonce.len() + self.ciphertext.len());
        result.extend_from_slice(&self.nonce);
        result.extend_from_slice(&self.ciphertext);
        result
    }

    /// Split bytes produced by `to_bytes` for a cipher with `nonce_len` nonces
    pub fn from_bytes(data: &[u8], nonce_len: usize) -> Option<Self> {
        if data.len() < nonce_len + TAG_LEN {
            return None;
        }

        Some(Self {
            nonce: data[..nonce_len].to_vec(),
            ciphertext: data[nonce_len..].to_vec(),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// AES-256-GCM (payloads)
// ═══════════════════════════════════════════════════════════════════════════

/// Encrypt data with AES-256-GCM, binding `aad`
pub fn encrypt_aes_gcm(key: &SymmetricKey, plaintext: &[u8], aad: &[u8]) -> VaultResult<EncryptedData> {
    let cipher = Aes256Gcm::new_from_slice(key.expose())
        .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;

    let nonce_bytes = generate_nonce();
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;

    Ok(EncryptedData {
        nonce: nonce_bytes.to_vec(),
        ciphertext,
    })
}

/// Decrypt data with AES-256-GCM
pub fn decrypt_aes_gcm(key: &SymmetricKey, encrypted: &EncryptedData, aad: &[u8]) -> VaultResult<Vec<u8>> {
    if encrypted.nonce.len() != NONCE_LEN {
        return Err(VaultError::DecryptionFailed);
    }

    let cipher = Aes256Gcm::new_from_slice(key.expose()).map_err(|_| VaultError::DecryptionFailed)?;
    let nonce = Nonce::from_slice(&encrypted.nonce);

    cipher
        .decrypt(nonce, Payload { msg: encrypted.ciphertext.as_slice(), aad })
        .map_err(|_| VaultError::DecryptionFailed)
}

// ═══════════════════════════════════════════════════════════════════════════
// XChaCha20-Poly1305 (key store)
// ═══════════════════════════════════════════════════════════════════════════

/// Encrypt data with XChaCha20-Poly1305, binding `aad`
pub fn encrypt_xchacha(key: &SymmetricKey, plaintext: &[u8], aad: &[u8]) -> VaultResult<EncryptedData> {
    let cipher = XChaCha20Poly1305::new_from_slice(key.expose())
        .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;

    let nonce_bytes = generate_xchacha_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;

    Ok(EncryptedData {
        nonce: nonce_bytes.to_vec(),
        ciphertext,
    })
}

/// Decrypt data with XChaCha20-Poly1305
pub fn decrypt_xchacha(key: &SymmetricKey, encrypted: &EncryptedData, aad: &[u8]) -> VaultResult<Vec<u8>> {
    if encrypted.nonce.len() != XCHACHA_NONCE_LEN {
        return Err(VaultError::DecryptionFailed);
    }

    let cipher = XChaCha20Poly1305::new_from_slice(key.expose()).map_err(|_| VaultError::DecryptionFailed)?;
    let nonce = XNonce::from_slice(&encrypted.nonce);

    cipher
        .decrypt(nonce, Payload { msg: encrypted.ciphertext.as_slice(), aad })
        .map_err(|_| VaultError::DecryptionFailed)
}

// ═══════════════════════════════════════════════════════════════════════════
// HMAC (key commitment)
// ═══════════════════════════════════════════════════════════════════════════

type HmacSha256 = Hmac<Sha256>;

fn hmac_for(key: &SymmetricKey, data: &[u8]) -> Result<HmacSha256, hmac::digest::InvalidLength> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key.expose())?;
    mac.update(data);
    Ok(mac)
}

/// Compute HMAC-SHA256
pub fn compute_hmac(key: &SymmetricKey, data: &[u8]) -> VaultResult<[u8; HMAC_LEN]> {
    let mac = hmac_for(key, data).map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;
    Ok(mac.finalize().into_bytes().into())
}

/// Verify HMAC-SHA256 in constant time. Any failure is `DecryptionFailed`.
pub fn verify_hmac(key: &SymmetricKey, data: &[u8], expected: &[u8]) -> VaultResult<()> {
    hmac_for(key, data)
        .map_err(|_| VaultError::DecryptionFailed)?
        .verify_slice(expected)
        .map_err(|_| VaultError::DecryptionFailed)
}
