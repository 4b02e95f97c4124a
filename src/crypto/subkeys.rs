//! BioKey Vault - HKDF Subkeys
//!
//! Splits a single payload key into independent encryption and commitment keys.

use hkdf::Hkdf;
use sha2::Sha256;

use super::keys::{contexts, SymmetricKey, KEY_LEN};
use crate::error::{VaultError, VaultResult};

/// Derive a subkey from a parent key with context
pub fn derive_subkey(parent: &SymmetricKey, salt: &[u8], info: &[u8]) -> VaultResult<SymmetricKey> {
    let hk = Hkdf::<Sha256>::new(Some(salt), parent.expose());
    let mut okm = [0u8; KEY_LEN];

    hk.expand(info, &mut okm)
        .map_err(|e| VaultError::KeyDerivationFailed(e.to_string()))?;

    Ok(SymmetricKey::new(okm))
}

/// Encryption and commitment subkeys for one payload
pub struct PayloadSubkeys {
    pub encryption: SymmetricKey,
    pub commitment: SymmetricKey,
}

impl PayloadSubkeys {
    pub fn derive(payload_key: &SymmetricKey) -> VaultResult<Self> {
        Ok(Self {
            encryption: derive_subkey(payload_key, b"", contexts::PAYLOAD_ENC)?,
            commitment: derive_subkey(payload_key, b"", contexts::PAYLOAD_COMMIT)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subkeys_independent() {
        let key = SymmetricKey::generate();
        let subkeys = PayloadSubkeys::derive(&key).unwrap();

        assert_ne!(subkeys.encryption.expose(), subkeys.commitment.expose());
        assert_ne!(subkeys.encryption.expose(), key.expose());
    }

    #[test]
    fn test_subkeys_deterministic() {
        let key = SymmetricKey::new([7u8; KEY_LEN]);
        let a = PayloadSubkeys::derive(&key).unwrap();
        let b = PayloadSubkeys::derive(&key).unwrap();
        assert_eq!(a.encryption.expose(), b.encryption.expose());
        assert_eq!(a.commitment.expose(), b.commitment.expose());
    }
}
