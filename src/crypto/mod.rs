//! BioKey Vault - Cryptographic Core
//!
//! Key material, AEAD primitives, subkey derivation and the master-key KDF.

pub mod keys;
pub mod aead;
pub mod subkeys;
pub mod kdf;

pub use keys::*;
pub use aead::*;
pub use subkeys::*;
pub use kdf::*;
