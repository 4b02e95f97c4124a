//! # BioKey Vault
//!
//! File encryption unlocked by a watermark fingerprint derived from two
//! biometric images.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     BIOKEY VAULT API                     │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────┐  │
//! │  │ FINGERPRINT │  │  ADVISORY   │  │  ACCESS GUARD   │  │
//! │  │ DERIVER     │  │  SCORER     │  │  (lockout)      │  │
//! │  └──────┬──────┘  └─────────────┘  └────────┬────────┘  │
//! │         │ SHA-256                            │           │
//! │  ┌──────┴────────────────────────────────────┴────────┐ │
//! │  │      KEY VAULT  fingerprint → payload key           │ │
//! │  │      XChaCha20-Poly1305 under the master key        │ │
//! │  └─────────────────────────┬───────────────────────────┘ │
//! │                            │                             │
//! │  ┌─────────────────────────┴───────────────────────────┐ │
//! │  │      PAYLOAD CIPHER  AES-256-GCM + HMAC commitment   │ │
//! │  └─────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Model
//!
//! - One fresh AES-256-GCM key per payload, never stored in the blob
//! - Key store encrypted at rest, master key from PBKDF2 or Argon2id
//! - Unknown fingerprints and wrong keys are reported identically
//! - Attempts are counted per fingerprint and locked out past the limit
//! - Key material zeroized on drop

pub mod api;
pub mod config;
pub mod crypto;
pub mod error;
pub mod fingerprint;
pub mod guard;
pub mod payload;
pub mod preview;
pub mod scorer;
pub mod secure_fs;
pub mod vault;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{AccessGrant, BioVaultApi, HealthReport, Registration, VaultStats};
pub use config::BioVaultConfig;
pub use error::{VaultError, VaultResult};
pub use fingerprint::{FingerprintConfig, FingerprintDeriver, FingerprintHash};
pub use guard::{AccessGuard, GuardConfig};
pub use scorer::{Advisory, AdvisoryScorer, NullScorer, Verdict};
pub use vault::KeyVault;

/// BioKey Vault version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
