//! BioKey Vault - Error Types

use thiserror::Error;

/// Result type for vault operations
pub type VaultResult<T> = Result<T, VaultError>;

/// Vault error types
#[derive(Error, Debug)]
pub enum VaultError {
    // ═══════════════════════════════════════════════════════════════
    // CALLER ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Image dimensions differ: {left:?} vs {right:?}")]
    DimensionMismatch { left: (u32, u32), right: (u32, u32) },

    #[error("Invalid file name: {0}")]
    InvalidFileName(String),

    #[error("File type not allowed: {0}")]
    UnsupportedFileType(String),

    #[error("File too large: {size} bytes (max: {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("File not found: {0}")]
    FileNotFound(String),

    // ═══════════════════════════════════════════════════════════════
    // STARTUP ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    // ═══════════════════════════════════════════════════════════════
    // STORE ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Key store corrupted or master key wrong: {0}")]
    CorruptStore(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    // ═══════════════════════════════════════════════════════════════
    // CRYPTO ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Deliberately carries no detail: wrong key, tampering and garbage
    /// input must look the same.
    #[error("Decryption failed")]
    DecryptionFailed,

    // ═══════════════════════════════════════════════════════════════
    // ACCESS ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("No key registered for this fingerprint")]
    UnknownIdentity,

    #[error("Access denied")]
    AccessDenied,

    #[error("Locked out - retry in {retry_after_secs} seconds")]
    LockedOut { retry_after_secs: u64 },

    #[error("Too many attempts - locked for {retry_after_secs} seconds")]
    TooManyAttempts { retry_after_secs: u64 },

    // ═══════════════════════════════════════════════════════════════
    // ADVISORY SCORER
    // ═══════════════════════════════════════════════════════════════

    #[error("Advisory scorer unavailable: {0}")]
    ScorerUnavailable(String),
}

impl VaultError {
    /// Denials that must be reported to the caller as a single
    /// "access denied" outcome.
    pub fn is_access_denial(&self) -> bool {
        matches!(
            self,
            VaultError::DecryptionFailed | VaultError::UnknownIdentity | VaultError::AccessDenied
        )
    }

    /// Retry hint for guard denials
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            VaultError::LockedOut { retry_after_secs }
            | VaultError::TooManyAttempts { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Collapse identity and decryption failures into `AccessDenied`.
    pub fn into_external(self) -> Self {
        if self.is_access_denial() {
            VaultError::AccessDenied
        } else {
            self
        }
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::SerializationError(e.to_string())
    }
}

impl From<image::ImageError> for VaultError {
    fn from(e: image::ImageError) -> Self {
        VaultError::InvalidImage(e.to_string())
    }
}

impl From<base64::DecodeError> for VaultError {
    fn from(e: base64::DecodeError) -> Self {
        VaultError::CorruptStore(format!("invalid key encoding: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denials_collapse() {
        assert!(matches!(VaultError::UnknownIdentity.into_external(), VaultError::AccessDenied));
        assert!(matches!(VaultError::DecryptionFailed.into_external(), VaultError::AccessDenied));
        assert_eq!(
            VaultError::UnknownIdentity.into_external().to_string(),
            VaultError::DecryptionFailed.into_external().to_string()
        );

        let locked = VaultError::LockedOut { retry_after_secs: 42 }.into_external();
        assert_eq!(locked.retry_after(), Some(42));
    }
}
