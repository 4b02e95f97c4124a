//! BioKey Vault - Unified Public API
//!
//! Single entry point for register and access. Sequences the deriver,
//! advisory scorer, payload cipher, key vault and access guard.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;

use crate::config::BioVaultConfig;
use crate::crypto::SymmetricKey;
use crate::error::{VaultError, VaultResult};
use crate::fingerprint::{Derivation, FingerprintDeriver, FingerprintHash};
use crate::guard::AccessGuard;
use crate::payload;
use crate::preview::{self, PreviewKind};
use crate::scorer::{self, Advisory, AdvisoryScorer};
use crate::secure_fs::SecureFs;
use crate::vault::KeyVault;

// ═══════════════════════════════════════════════════════════════════════════════
// RESULT TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Outcome of a registration
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    /// Blob name inside the secure directory
    pub encrypted_file: String,
    pub encrypted_path: PathBuf,
    /// First 8 hex chars of the fingerprint
    pub fingerprint_prefix: String,
    pub preview: Option<PathBuf>,
    pub advisory: Option<Advisory>,
}

/// Outcome of a granted access
#[derive(Debug, Clone, Serialize)]
pub struct AccessGrant {
    /// Output name inside the secure directory, never ending in `.enc`
    pub decrypted_file: String,
    pub decrypted_path: PathBuf,
    /// Leading text of text-like payloads
    pub content_preview: Option<String>,
    pub preview: Option<PathBuf>,
    pub advisory: Option<Advisory>,
}

/// Vault statistics
#[derive(Debug, Clone, Serialize)]
pub struct VaultStats {
    pub total_registrations: usize,
    pub encrypted_files: usize,
    pub scorer_loaded: bool,
}

/// Health report
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub scorer_loaded: bool,
    pub secure_storage: bool,
    pub key_store_readable: bool,
    pub timestamp: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// BIOKEY VAULT API
// ═══════════════════════════════════════════════════════════════════════════════

/// BioKey Vault API
///
/// Built once at startup and shared by reference; every method takes `&self`.
///
/// # Example
///
/// ```rust,ignore
/// use biokey_vault::{BioVaultApi, BioVaultConfig};
///
/// let api = BioVaultApi::open(BioVaultConfig::default(), &password)?;
///
/// let reg = api.register("report.pdf", &payload, &iris_png, &fingerprint_png)?;
/// let grant = api.access(&reg.encrypted_file, &iris_png, &fingerprint_png)?;
/// ```
pub struct BioVaultApi {
    config: BioVaultConfig,
    deriver: FingerprintDeriver,
    vault: Arc<KeyVault>,
    guard: Arc<AccessGuard>,
    scorer: Arc<dyn AdvisoryScorer>,
    fs: SecureFs,
}

impl BioVaultApi {
    // ═══════════════════════════════════════════════════════════════════════
    // INITIALIZATION
    // ═══════════════════════════════════════════════════════════════════════

    /// Validate the configuration, create directories, derive the master key
    /// and open the key store.
    pub fn open(config: BioVaultConfig, master_password: &SecretString) -> VaultResult<Self> {
        config.validate()?;
        config.setup_directories()?;

        let vault = KeyVault::open(&config.paths.key_file, master_password, &config.kdf)?;
        let guard = AccessGuard::new(config.guard.clone());
        let scorer = scorer::load_scorer(config.scorer_model.as_deref());

        Self::with_components(config, Arc::new(vault), Arc::new(guard), scorer)
    }

    /// Assemble from already constructed parts
    pub fn with_components(
        config: BioVaultConfig,
        vault: Arc<KeyVault>,
        guard: Arc<AccessGuard>,
        scorer: Arc<dyn AdvisoryScorer>,
    ) -> VaultResult<Self> {
        config.validate()?;
        config.setup_directories()?;

        let deriver = FingerprintDeriver::new(config.fingerprint.clone())?;
        let fs = SecureFs::new(&config.paths.secure_dir);

        Ok(Self {
            config,
            deriver,
            vault,
            guard,
            scorer,
            fs,
        })
    }

    pub fn config(&self) -> &BioVaultConfig {
        &self.config
    }

    pub fn guard(&self) -> &AccessGuard {
        &self.guard
    }

    pub fn vault(&self) -> &KeyVault {
        &self.vault
    }

    pub fn secure_dir(&self) -> &Path {
        self.fs.root()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // FINGERPRINT
    // ═══════════════════════════════════════════════════════════════════════

    /// Fingerprint of two samples, without touching the vault
    pub fn fingerprint(&self, sample_a: &[u8], sample_b: &[u8]) -> VaultResult<FingerprintHash> {
        Ok(self.deriver.derive(sample_a, sample_b)?.hash)
    }

    fn derive_and_advise(&self, sample_a: &[u8], sample_b: &[u8]) -> VaultResult<(Derivation, Option<Advisory>)> {
        let derivation = self.deriver.derive(sample_a, sample_b)?;
        let advisory = scorer::advise(self.scorer.as_ref(), &derivation.composite, &derivation.hash);
        Ok((derivation, advisory))
    }

    fn write_preview(&self, derivation: &Derivation, kind: PreviewKind) -> Option<PathBuf> {
        if !self.config.previews {
            return None;
        }
        preview::write_preview_best_effort(&self.fs, &derivation.hash, &derivation.composite, kind)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // REGISTER
    // ═══════════════════════════════════════════════════════════════════════

    /// Encrypt `payload` under a fresh key and bind the key to the
    /// fingerprint of the two samples. Re-registering a fingerprint replaces
    /// its key. Every call writes a new blob; existing blobs are never
    /// touched.
    pub fn register(
        &self,
        file_name: &str,
        payload_bytes: &[u8],
        sample_a: &[u8],
        sample_b: &[u8],
    ) -> VaultResult<Registration> {
        log::info!("Registration attempt for file: {}", file_name.escape_debug());

        self.config.limits.check_upload(file_name, payload_bytes.len() as u64)?;
        let blob_name = SecureFs::blob_name(file_name)?;

        let (derivation, advisory) = self.derive_and_advise(sample_a, sample_b)?;
        let hash = derivation.hash;

        let (key, blob) = payload::encrypt(payload_bytes)?;
        self.vault.put(&hash, key)?;

        let encrypted_path = self.fs.write_blob(&blob_name, &blob).map_err(|e| {
            log::error!("Key stored for {} but blob {} not written: {}", hash.short(), blob_name, e);
            e
        })?;

        let preview = self.write_preview(&derivation, PreviewKind::Register);

        log::info!("File registered: {} -> {} ({})", file_name.escape_debug(), blob_name, hash.short());

        Ok(Registration {
            encrypted_file: blob_name,
            encrypted_path,
            fingerprint_prefix: hash.short(),
            preview,
            advisory,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ACCESS
    // ═══════════════════════════════════════════════════════════════════════

    /// Decrypt a blob stored in the secure directory
    pub fn access(&self, blob_name: &str, sample_a: &[u8], sample_b: &[u8]) -> VaultResult<AccessGrant> {
        let blob = self.fs.read_file(blob_name)?;
        self.access_bytes(blob_name, &blob, sample_a, sample_b)
    }

    /// Decrypt caller-supplied blob bytes.
    ///
    /// Unknown fingerprints and failed decryptions both come back as
    /// `AccessDenied`; guard denials carry a retry hint.
    pub fn access_bytes(
        &self,
        blob_name: &str,
        blob: &[u8],
        sample_a: &[u8],
        sample_b: &[u8],
    ) -> VaultResult<AccessGrant> {
        log::info!("Access attempt for file: {}", blob_name.escape_debug());

        let output_name = SecureFs::decrypted_name(blob_name)?;
        let (derivation, advisory) = self.derive_and_advise(sample_a, sample_b)?;
        let hash = derivation.hash;

        let plaintext = self.unlock(&hash, blob).map_err(VaultError::into_external)?;

        let decrypted_path = self.fs.write_file(&output_name, &plaintext)?;
        let content_preview = preview::text_preview(&output_name, &plaintext);
        let preview = self.write_preview(&derivation, PreviewKind::Access);

        log::info!("Access granted: {} ({})", output_name, hash.short());

        Ok(AccessGrant {
            decrypted_file: output_name,
            decrypted_path,
            content_preview,
            preview,
            advisory,
        })
    }

    /// Guard, lookup, decrypt, clear. The scorer plays no part here.
    fn unlock(&self, hash: &FingerprintHash, blob: &[u8]) -> VaultResult<Vec<u8>> {
        self.guard.check_and_record(hash).into_result()?;

        let result = match self.vault.get(hash)? {
            Some(key) => payload::decrypt(blob, &key),
            None => {
                // Same work as a wrong key
                let _ = payload::decrypt(blob, &SymmetricKey::generate());
                Err(VaultError::UnknownIdentity)
            }
        };

        match result {
            Ok(plaintext) => {
                self.guard.clear_on_success(hash);
                Ok(plaintext)
            }
            Err(e) => {
                log::warn!("Access denied for {}: {}", hash.short(), e);
                Err(e)
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // MAINTENANCE
    // ═══════════════════════════════════════════════════════════════════════

    /// Remove a registration. Its blobs become undecryptable.
    pub fn revoke(&self, hash: &FingerprintHash) -> VaultResult<bool> {
        let removed = self.vault.remove(hash)?;
        if removed {
            log::info!("Registration {} revoked", hash.short());
        } else {
            log::warn!("Revoke requested for unknown fingerprint {}", hash.short());
        }
        Ok(removed)
    }

    /// Get vault statistics
    pub fn stats(&self) -> VaultResult<VaultStats> {
        Ok(VaultStats {
            total_registrations: self.vault.list_hashes()?.len(),
            encrypted_files: self.fs.count_blobs(),
            scorer_loaded: self.scorer.is_loaded(),
        })
    }

    /// Never fails; problems show up as `degraded`
    pub fn health(&self) -> HealthReport {
        let secure_storage = self.fs.root().is_dir();
        let key_store_readable = match self.vault.load() {
            Ok(_) => true,
            Err(e) => {
                log::error!("Health check: key store unreadable: {}", e);
                false
            }
        };

        HealthReport {
            status: if secure_storage && key_store_readable { "healthy" } else { "degraded" },
            scorer_loaded: self.scorer.is_loaded(),
            secure_storage,
            key_store_readable,
            timestamp: Utc::now(),
        }
    }
}
