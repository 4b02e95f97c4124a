//! Payload encryption for BioKey Vault
//!
//! Format of a `.enc` blob:
//! ```text
//! [MAGIC 8B]["BIOKEYPL"]
//! [VERSION 1B][0x01]
//! [NONCE 12B][random]
//! [CIPHERTEXT variable][AES-256-GCM, header as AAD]
//! [TAG 16B][GCM auth tag]
//! [COMMIT 32B][HMAC-SHA256 of all above, keyed by the commitment subkey]
//! ```
//!
//! The payload key itself is never stored in the blob. Both working keys are
//! HKDF subkeys of it, so the commitment tag binds the blob to exactly one key.

use crate::crypto::{
    compute_hmac, decrypt_aes_gcm, encrypt_aes_gcm, verify_hmac, EncryptedData, PayloadSubkeys,
    SymmetricKey, HMAC_LEN, NONCE_LEN, TAG_LEN,
};
use crate::error::{VaultError, VaultResult};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic bytes identifying a BioKey payload blob
const MAGIC: &[u8; 8] = b"BIOKEYPL";

/// Current format version
const VERSION: u8 = 0x01;

/// Header size: MAGIC(8) + VERSION(1) + NONCE(12)
const HEADER_SIZE: usize = 8 + 1 + NONCE_LEN;

/// Minimum valid blob size
const MIN_BLOB_SIZE: usize = HEADER_SIZE + TAG_LEN + HMAC_LEN;

/// File suffix of payload blobs
pub const BLOB_SUFFIX: &str = ".enc";

// ---------------------------------------------------------------------------
// Encrypt / decrypt
// ---------------------------------------------------------------------------

/// Encrypt under a fresh random key. The key is returned separately for the
/// key vault; it is not part of the blob.
pub fn encrypt(plaintext: &[u8]) -> VaultResult<(SymmetricKey, Vec<u8>)> {
    let key = SymmetricKey::generate();
    let blob = encrypt_with_key(&key, plaintext)?;
    Ok((key, blob))
}

/// Encrypt under an existing key
pub fn encrypt_with_key(key: &SymmetricKey, plaintext: &[u8]) -> VaultResult<Vec<u8>> {
    let subkeys = PayloadSubkeys::derive(key)?;

    let mut aad = [0u8; 9];
    aad[..8].copy_from_slice(MAGIC);
    aad[8] = VERSION;

    let encrypted = encrypt_aes_gcm(&subkeys.encryption, plaintext, &aad)?;

    let mut output = Vec::with_capacity(MIN_BLOB_SIZE + plaintext.len());
    output.extend_from_slice(&aad);
    output.extend_from_slice(&encrypted.to_bytes());

    let commit = compute_hmac(&subkeys.commitment, &output)?;
    output.extend_from_slice(&commit);

    Ok(output)
}

/// Verify and decrypt a blob.
///
/// Every failure (truncation, bad magic, wrong key, tampering) is the same
/// `DecryptionFailed`.
pub fn decrypt(blob: &[u8], key: &SymmetricKey) -> VaultResult<Vec<u8>> {
    if blob.len() < MIN_BLOB_SIZE || &blob[..8] != MAGIC || blob[8] != VERSION {
        return Err(VaultError::DecryptionFailed);
    }

    let subkeys = PayloadSubkeys::derive(key).map_err(|_| VaultError::DecryptionFailed)?;

    let commit_start = blob.len() - HMAC_LEN;
    verify_hmac(&subkeys.commitment, &blob[..commit_start], &blob[commit_start..])?;

    let encrypted = EncryptedData::from_bytes(&blob[9..commit_start], NONCE_LEN)
        .ok_or(VaultError::DecryptionFailed)?;

    decrypt_aes_gcm(&subkeys.encryption, &encrypted, &blob[..9])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
