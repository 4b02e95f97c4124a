//! BioKey Vault - Configuration
//!
//! Read once at startup. Changing `fingerprint` settings invalidates every
//! registered fingerprint.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::crypto::KdfConfig;
use crate::error::{VaultError, VaultResult};
use crate::fingerprint::FingerprintConfig;
use crate::guard::GuardConfig;
use crate::secure_fs::sanitize_file_name;

/// Storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Payload blobs, previews and decrypted output
    pub secure_dir: PathBuf,
    /// Encrypted key store
    pub key_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            secure_dir: PathBuf::from("./secure_files"),
            key_file: PathBuf::from("./biometric_keys.enc"),
        }
    }
}

/// Payload upload limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Max payload size (bytes)
    pub max_file_size: u64,
    /// Lowercase extensions without the dot
    pub allowed_extensions: Vec<String>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size: 100 * 1024 * 1024, // 100 MB
            allowed_extensions: [
                "txt", "pdf", "png", "jpg", "jpeg", "csv", "json", "docx", "doc", "xlsx", "xls", "pptx", "zip",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl LimitsConfig {
    /// Check a payload before it is encrypted
    pub fn check_upload(&self, file_name: &str, size: u64) -> VaultResult<()> {
        if size > self.max_file_size {
            return Err(VaultError::FileTooLarge { size, max: self.max_file_size });
        }

        let name = sanitize_file_name(file_name)?;
        let ext = Path::new(&name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        if !self.allowed_extensions.iter().any(|a| a.eq_ignore_ascii_case(&ext)) {
            return Err(VaultError::UnsupportedFileType(if ext.is_empty() {
                "(none)".into()
            } else {
                ext
            }));
        }
        Ok(())
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BioVaultConfig {
    pub paths: PathsConfig,
    pub fingerprint: FingerprintConfig,
    pub guard: GuardConfig,
    pub kdf: KdfConfig,
    pub limits: LimitsConfig,
    /// Write composite PNG previews
    pub previews: bool,
    /// Advisory model weights (`ai` feature)
    pub scorer_model: Option<PathBuf>,
}

impl Default for BioVaultConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            fingerprint: FingerprintConfig::default(),
            guard: GuardConfig::default(),
            kdf: KdfConfig::default(),
            limits: LimitsConfig::default(),
            previews: true,
            scorer_model: None,
        }
    }
}

impl BioVaultConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> VaultResult<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .map_err(|e| VaultError::Configuration(format!("cannot read {}: {}", path.display(), e)))?;

        let config: Self = serde_json::from_slice(&data)
            .map_err(|e| VaultError::Configuration(format!("invalid {}: {}", path.display(), e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Configuration rooted in one directory
    pub fn in_dir<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref();
        Self {
            paths: PathsConfig {
                secure_dir: root.join("secure_files"),
                key_file: root.join("biometric_keys.enc"),
            },
            ..Default::default()
        }
    }

    /// Fail fast on anything that would only break later
    pub fn validate(&self) -> VaultResult<()> {
        self.fingerprint.validate()?;
        self.guard.validate()?;
        self.kdf.validate()?;

        if self.limits.max_file_size == 0 {
            return Err(VaultError::Configuration("limits.max_file_size must be positive".into()));
        }
        if self.limits.allowed_extensions.is_empty() {
            return Err(VaultError::Configuration("limits.allowed_extensions is empty".into()));
        }
        if self.paths.key_file.file_name().is_none() {
            return Err(VaultError::Configuration(format!(
                "paths.key_file is not a file path: {}",
                self.paths.key_file.display()
            )));
        }
        if self.paths.key_file.parent() == Some(self.paths.secure_dir.as_path()) {
            return Err(VaultError::Configuration(
                "paths.key_file must not live in paths.secure_dir".into(),
            ));
        }
        Ok(())
    }

    /// Create the secure directory and the key file's directory
    pub fn setup_directories(&self) -> VaultResult<()> {
        std::fs::create_dir_all(&self.paths.secure_dir)?;
        if let Some(parent) = self.paths.key_file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KdfAlgorithm;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = BioVaultConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.previews);
        assert_eq!(config.fingerprint.image_size, 128);
        assert_eq!(config.guard.max_attempts, 5);
        assert_eq!(config.limits.max_file_size, 100 * 1024 * 1024);
        assert!(config.scorer_model.is_none());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("biokey.json");
        std::fs::write(
            &path,
            r#"{
                "guard": { "max_attempts": 3 },
                "kdf": { "algorithm": { "type": "pbkdf2_sha256", "iterations": 150000 } },
                "previews": false
            }"#,
        )
        .unwrap();

        let config = BioVaultConfig::load(&path).unwrap();
        assert_eq!(config.guard.max_attempts, 3);
        assert_eq!(config.guard.lockout_secs, 300);
        assert!(matches!(config.kdf.algorithm, KdfAlgorithm::Pbkdf2Sha256 { iterations: 150_000 }));
        assert!(!config.previews);
        assert_eq!(config.fingerprint.tiles, 8);
    }

    #[test]
    fn test_load_rejects_invalid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("biokey.json");

        std::fs::write(&path, r#"{ "fingerprint": { "image_size": 100, "tiles": 8 } }"#).unwrap();
        assert!(matches!(BioVaultConfig::load(&path), Err(VaultError::Configuration(_))));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(BioVaultConfig::load(&path), Err(VaultError::Configuration(_))));

        assert!(matches!(
            BioVaultConfig::load(dir.path().join("missing.json")),
            Err(VaultError::Configuration(_))
        ));
    }

    #[test]
    fn test_key_file_outside_secure_dir() {
        let mut config = BioVaultConfig::in_dir("/srv/biokey");
        assert!(config.validate().is_ok());

        config.paths.key_file = config.paths.secure_dir.join("keys.enc");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_setup_directories() {
        let dir = tempdir().unwrap();
        let mut config = BioVaultConfig::in_dir(dir.path());
        config.paths.key_file = dir.path().join("keys").join("store.enc");

        config.setup_directories().unwrap();
        assert!(config.paths.secure_dir.is_dir());
        assert!(dir.path().join("keys").is_dir());
    }

    #[test]
    fn test_check_upload() {
        let limits = LimitsConfig::default();

        assert!(limits.check_upload("report.PDF", 10).is_ok());
        assert!(matches!(
            limits.check_upload("tool.exe", 10),
            Err(VaultError::UnsupportedFileType(_))
        ));
        assert!(matches!(
            limits.check_upload("README", 10),
            Err(VaultError::UnsupportedFileType(_))
        ));
        assert!(matches!(
            limits.check_upload("big.zip", limits.max_file_size + 1),
            Err(VaultError::FileTooLarge { .. })
        ));
        assert!(limits.check_upload("big.zip", limits.max_file_size).is_ok());
    }
}
