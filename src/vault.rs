//! BioKey Vault - Key Vault
//!
//! Encrypted-at-rest map from fingerprint hash to payload key. The whole map
//! lives in one XChaCha20-Poly1305 blob; every mutation is a full
//! load-modify-save under a single-writer lock.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use secrecy::SecretString;
use zeroize::{Zeroize, Zeroizing};

use crate::crypto::{
    contexts, decrypt_xchacha, derive_master_key, derive_subkey, encrypt_xchacha, EncryptedData,
    KdfConfig, MasterKey, SymmetricKey, XCHACHA_NONCE_LEN,
};
use crate::error::{VaultError, VaultResult};
use crate::fingerprint::FingerprintHash;
use crate::secure_fs::write_atomic;

/// Magic bytes identifying the key store file
const STORE_MAGIC: &[u8; 8] = b"BIOKEYVS";

/// Current store format version
const STORE_VERSION: u8 = 0x01;

/// MAGIC(8) + VERSION(1), bound as AAD
const STORE_HEADER_LEN: usize = 9;

/// In-memory form of the store
pub type KeyMap = BTreeMap<FingerprintHash, SymmetricKey>;

/// Key Vault - one instance per process, shared by reference
pub struct KeyVault {
    /// Store file path
    path: PathBuf,
    /// Subkey of the master key used for the store
    store_key: SymmetricKey,
    /// Serializes load-modify-save cycles
    write_lock: Mutex<()>,
}

impl KeyVault {
    // ═══════════════════════════════════════════════════════════════════════
    // INITIALIZATION
    // ═══════════════════════════════════════════════════════════════════════

    /// Derive the master key from a password and open the store.
    ///
    /// Fails if the key cannot be derived or an existing store does not
    /// decrypt under it.
    pub fn open<P: AsRef<Path>>(path: P, password: &SecretString, kdf: &KdfConfig) -> VaultResult<Self> {
        let master = derive_master_key(password, kdf)?;
        Self::with_master_key(path, &master)
    }

    /// Open the store with an already derived master key
    pub fn with_master_key<P: AsRef<Path>>(path: P, master: &MasterKey) -> VaultResult<Self> {
        let vault = Self {
            path: path.as_ref().to_path_buf(),
            store_key: derive_subkey(master.key(), b"", contexts::STORE)?,
            write_lock: Mutex::new(()),
        };

        let count = vault.load()?.len();
        log::info!("Key vault opened at {} ({} records)", vault.path.display(), count);

        Ok(vault)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ═══════════════════════════════════════════════════════════════════════
    // LOAD / SAVE
    // ═══════════════════════════════════════════════════════════════════════

    /// Read and decrypt the whole store. A missing file is an empty store.
    pub fn load(&self) -> VaultResult<KeyMap> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("Key store not found, starting empty");
                return Ok(KeyMap::new());
            }
            Err(e) => return Err(e.into()),
        };

        let map = self.decode(&data).map_err(|e| {
            log::error!("Failed to load key store {}: {}", self.path.display(), e);
            e
        })?;

        log::debug!("Loaded {} keys from storage", map.len());
        Ok(map)
    }

    /// Encrypt and atomically replace the whole store
    pub fn save(&self, map: &KeyMap) -> VaultResult<()> {
        let _guard = self.write_lock.lock();
        self.save_locked(map)
    }

    fn save_locked(&self, map: &KeyMap) -> VaultResult<()> {
        let data = self.encode(map)?;
        write_atomic(&self.path, &data).map_err(|e| {
            log::error!("Failed to save key store {}: {}", self.path.display(), e);
            e
        })?;

        log::info!("Saved {} keys to storage", map.len());
        Ok(())
    }

    /// Load, apply `f`, save if `f` reports a change
    fn update<R>(&self, f: impl FnOnce(&mut KeyMap) -> (R, bool)) -> VaultResult<R> {
        let _guard = self.write_lock.lock();

        let mut map = self.load()?;
        let (result, changed) = f(&mut map);
        if changed {
            self.save_locked(&map)?;
        }

        Ok(result)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // RECORD OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════

    /// Insert or overwrite; last write wins
    pub fn put(&self, hash: &FingerprintHash, key: SymmetricKey) -> VaultResult<()> {
        let replaced = self.update(|map| (map.insert(*hash, key).is_some(), true))?;

        if replaced {
            log::warn!(
                "Fingerprint {} re-registered; payloads under the previous key are orphaned",
                hash.short()
            );
        }
        Ok(())
    }

    /// Look up a key. `None` is the normal unknown-identity case.
    pub fn get(&self, hash: &FingerprintHash) -> VaultResult<Option<SymmetricKey>> {
        Ok(self.load()?.remove(hash))
    }

    /// Delete a record; returns whether it existed
    pub fn remove(&self, hash: &FingerprintHash) -> VaultResult<bool> {
        self.update(|map| {
            let removed = map.remove(hash).is_some();
            (removed, removed)
        })
    }

    /// All registered hashes (diagnostics only)
    pub fn list_hashes(&self) -> VaultResult<BTreeSet<FingerprintHash>> {
        Ok(self.load()?.into_keys().collect())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ENCODING
    // ═══════════════════════════════════════════════════════════════════════

    fn encode(&self, map: &KeyMap) -> VaultResult<Vec<u8>> {
        let mut plain: BTreeMap<String, String> = map
            .iter()
            .map(|(hash, key)| (hash.to_hex(), key.to_base64().to_string()))
            .collect();

        let json = serde_json::to_vec(&plain).map(Zeroizing::new);
        plain.values_mut().for_each(|v| v.zeroize());
        let json = json?;

        let mut header = [0u8; STORE_HEADER_LEN];
        header[..8].copy_from_slice(STORE_MAGIC);
        header[8] = STORE_VERSION;

        let encrypted = encrypt_xchacha(&self.store_key, &json, &header)?;

        let mut out = Vec::with_capacity(STORE_HEADER_LEN + XCHACHA_NONCE_LEN + encrypted.ciphertext.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&encrypted.to_bytes());
        Ok(out)
    }

    fn decode(&self, data: &[u8]) -> VaultResult<KeyMap> {
        if data.len() < STORE_HEADER_LEN || &data[..8] != STORE_MAGIC {
            return Err(VaultError::CorruptStore("not a key store file".into()));
        }
        if data[8] != STORE_VERSION {
            return Err(VaultError::CorruptStore(format!("unsupported store version {}", data[8])));
        }

        let encrypted = EncryptedData::from_bytes(&data[STORE_HEADER_LEN..], XCHACHA_NONCE_LEN)
            .ok_or_else(|| VaultError::CorruptStore("truncated".into()))?;

        let json = decrypt_xchacha(&self.store_key, &encrypted, &data[..STORE_HEADER_LEN])
            .map(Zeroizing::new)
            .map_err(|_| VaultError::CorruptStore("authentication failed".into()))?;

        let mut plain: BTreeMap<String, String> = serde_json::from_slice(&json)
            .map_err(|e| VaultError::CorruptStore(format!("invalid contents: {}", e)))?;

        let parsed = plain
            .iter()
            .map(|(hash, key)| -> VaultResult<(FingerprintHash, SymmetricKey)> {
                Ok((hash.parse()?, SymmetricKey::from_base64(key)?))
            })
            .collect::<VaultResult<KeyMap>>()
            .map_err(|e| match e {
                VaultError::CorruptStore(_) => e,
                other => VaultError::CorruptStore(other.to_string()),
            });

        plain.values_mut().for_each(|v| v.zeroize());
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_LEN;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn master(byte: u8) -> MasterKey {
        MasterKey::new([byte; KEY_LEN])
    }

    fn hash(n: u8) -> FingerprintHash {
        FingerprintHash::of_pixels(&[n])
    }

    #[test]
    fn test_missing_store_is_empty() {
        let dir = tempdir().unwrap();
        let vault = KeyVault::with_master_key(dir.path().join("keys.enc"), &master(1)).unwrap();

        assert!(vault.load().unwrap().is_empty());
        assert!(vault.get(&hash(1)).unwrap().is_none());
        assert!(!vault.path().exists());
    }

    #[test]
    fn test_put_get_remove() {
        let dir = tempdir().unwrap();
        let vault = KeyVault::with_master_key(dir.path().join("keys.enc"), &master(1)).unwrap();

        let key = SymmetricKey::generate();
        vault.put(&hash(1), key.clone()).unwrap();
        assert_eq!(vault.get(&hash(1)).unwrap().unwrap().expose(), key.expose());

        assert!(vault.remove(&hash(1)).unwrap());
        assert!(vault.get(&hash(1)).unwrap().is_none());
        assert!(!vault.remove(&hash(1)).unwrap());
    }

    #[test]
    fn test_put_overwrites() {
        let dir = tempdir().unwrap();
        let vault = KeyVault::with_master_key(dir.path().join("keys.enc"), &master(1)).unwrap();

        vault.put(&hash(1), SymmetricKey::generate()).unwrap();
        let newer = SymmetricKey::generate();
        vault.put(&hash(1), newer.clone()).unwrap();

        assert_eq!(vault.list_hashes().unwrap().len(), 1);
        assert_eq!(vault.get(&hash(1)).unwrap().unwrap().expose(), newer.expose());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keys.enc");
        let vault = KeyVault::with_master_key(&path, &master(1)).unwrap();

        let mut map = KeyMap::new();
        for n in 0..5 {
            map.insert(hash(n), SymmetricKey::generate());
        }
        vault.save(&map).unwrap();

        let reopened = KeyVault::with_master_key(&path, &master(1)).unwrap();
        let loaded = reopened.load().unwrap();
        assert_eq!(loaded.len(), map.len());
        for (h, k) in &map {
            assert_eq!(loaded[h].expose(), k.expose());
        }

        // save(load()) leaves the map unchanged
        reopened.save(&loaded).unwrap();
        let again = reopened.load().unwrap();
        assert!(again.iter().all(|(h, k)| map[h].expose() == k.expose()));
    }

    #[test]
    fn test_store_hides_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keys.enc");
        let vault = KeyVault::with_master_key(&path, &master(1)).unwrap();

        let key = SymmetricKey::generate();
        vault.put(&hash(9), key.clone()).unwrap();

        let raw = std::fs::read(&path).unwrap();
        let raw_text = String::from_utf8_lossy(&raw);
        assert!(!raw_text.contains(&hash(9).to_hex()));
        assert!(!raw_text.contains(key.to_base64().as_str()));
    }

    #[test]
    fn test_wrong_master_key_is_corrupt_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keys.enc");
        let vault = KeyVault::with_master_key(&path, &master(1)).unwrap();
        vault.put(&hash(1), SymmetricKey::generate()).unwrap();

        assert!(matches!(
            KeyVault::with_master_key(&path, &master(2)),
            Err(VaultError::CorruptStore(_))
        ));
    }

    #[test]
    fn test_tampered_store_is_corrupt_not_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keys.enc");
        let vault = KeyVault::with_master_key(&path, &master(1)).unwrap();
        vault.put(&hash(1), SymmetricKey::generate()).unwrap();

        let mut raw = std::fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        std::fs::write(&path, &raw).unwrap();

        assert!(matches!(vault.load(), Err(VaultError::CorruptStore(_))));
        assert!(matches!(vault.get(&hash(1)), Err(VaultError::CorruptStore(_))));
        assert!(matches!(vault.put(&hash(2), SymmetricKey::generate()), Err(VaultError::CorruptStore(_))));

        std::fs::write(&path, b"garbage").unwrap();
        assert!(matches!(vault.load(), Err(VaultError::CorruptStore(_))));
    }

    #[test]
    fn test_concurrent_puts_do_not_lose_updates() {
        let dir = tempdir().unwrap();
        let vault = Arc::new(KeyVault::with_master_key(dir.path().join("keys.enc"), &master(1)).unwrap());

        let handles: Vec<_> = (0..8u8)
            .map(|t| {
                let vault = Arc::clone(&vault);
                std::thread::spawn(move || {
                    for i in 0..4u8 {
                        vault.put(&hash(t * 4 + i), SymmetricKey::generate()).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(vault.list_hashes().unwrap().len(), 32);
    }

    #[test]
    fn test_open_with_password() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keys.enc");
        let password = SecretString::new("master password".into());

        let vault = KeyVault::open(&path, &password, &KdfConfig::default()).unwrap();
        vault.put(&hash(3), SymmetricKey::generate()).unwrap();

        let reopened = KeyVault::open(&path, &password, &KdfConfig::default()).unwrap();
        assert!(reopened.get(&hash(3)).unwrap().is_some());

        let wrong = SecretString::new("not the password".into());
        assert!(matches!(
            KeyVault::open(&path, &wrong, &KdfConfig::default()),
            Err(VaultError::CorruptStore(_))
        ));
    }
}
