//! BioKey Vault - Secure Filesystem Operations
//!
//! Atomic writes, payload blob storage and file-name sanitizing.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{VaultError, VaultResult};
use crate::payload::BLOB_SUFFIX;

/// Prefix of decrypted output files
pub const DECRYPTED_PREFIX: &str = "decrypted_";

/// Hex chars of the random tag in a blob name
pub const BLOB_TAG_LEN: usize = 12;

/// Directory of `path`, `.` for a bare file name
fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Write `data` to a fresh temp file next to `path` and fsync it
fn write_temp(parent: &Path, path: &Path, data: &[u8]) -> VaultResult<PathBuf> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| VaultError::InvalidFileName(path.display().to_string()))?;

    // Unique per writer so concurrent replacements never share a temp file
    let temp_path = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    let result = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .and_then(|mut file| {
            file.write_all(data)?;
            file.sync_all()
        });

    match result {
        Ok(()) => Ok(temp_path),
        Err(e) => {
            let _ = fs::remove_file(&temp_path);
            Err(e.into())
        }
    }
}

/// Make a rename or link durable
fn sync_dir(dir: &Path) -> VaultResult<()> {
    #[cfg(unix)]
    fs::File::open(dir)?.sync_all()?;
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

/// Write `data` to `path` all-or-nothing: unique temp file in the same
/// directory, fsync, rename over the target, fsync the directory.
pub fn write_atomic(path: &Path, data: &[u8]) -> VaultResult<()> {
    let parent = parent_dir(path);
    fs::create_dir_all(&parent)?;

    let temp_path = write_temp(&parent, path, data)?;
    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    sync_dir(&parent)
}

/// Like [`write_atomic`], but fails with `AlreadyExists` instead of
/// replacing an existing file.
pub fn write_new(path: &Path, data: &[u8]) -> VaultResult<()> {
    let parent = parent_dir(path);
    fs::create_dir_all(&parent)?;

    let temp_path = write_temp(&parent, path, data)?;
    // link(2) never replaces its target
    let linked = fs::hard_link(&temp_path, path);
    let _ = fs::remove_file(&temp_path);
    linked?;
    sync_dir(&parent)
}

fn is_blob_name(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(BLOB_SUFFIX)
}

/// Drop a trailing `.<hex tag>` added by [`SecureFs::blob_name`]
fn strip_blob_tag(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, tag))
            if !stem.is_empty()
                && tag.len() == BLOB_TAG_LEN
                && tag.bytes().all(|b| b.is_ascii_hexdigit()) =>
        {
            stem
        }
        _ => name,
    }
}

/// Strip directories, traversal and control characters from a user-supplied
/// file name.
pub fn sanitize_file_name(name: &str) -> VaultResult<String> {
    // Keep only the last path component, whichever separator was used
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");

    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').to_string();

    if cleaned.is_empty() {
        return Err(VaultError::InvalidFileName(name.escape_debug().to_string()));
    }
    Ok(cleaned)
}

/// Directory of payload blobs, previews and decrypted output
pub struct SecureFs {
    /// Root directory
    root: PathBuf,
}

impl SecureFs {
    /// Create new SecureFs with root directory
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full path for an already-sanitized file name
    pub fn full_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// `<name>.<tag>.enc` with a random tag, so every registration gets its
    /// own blob
    pub fn blob_name(original_name: &str) -> VaultResult<String> {
        let tag = Uuid::new_v4().simple().to_string();
        Ok(format!(
            "{}.{}{}",
            sanitize_file_name(original_name)?,
            &tag[..BLOB_TAG_LEN],
            BLOB_SUFFIX
        ))
    }

    /// `decrypted_<name>`, dropping `.enc` and the blob tag. Names that would
    /// still end in `.enc` are rejected.
    pub fn decrypted_name(blob_name: &str) -> VaultResult<String> {
        let invalid = || VaultError::InvalidFileName(blob_name.escape_debug().to_string());

        let base = sanitize_file_name(blob_name)?;
        let base = base.strip_suffix(BLOB_SUFFIX).unwrap_or(&base);
        let base = strip_blob_tag(base);

        if base.is_empty() || is_blob_name(base) {
            return Err(invalid());
        }
        Ok(format!("{}{}", DECRYPTED_PREFIX, base))
    }

    /// Store a new payload blob. Existing blobs are never replaced.
    pub fn write_blob(&self, name: &str, data: &[u8]) -> VaultResult<PathBuf> {
        let name = sanitize_file_name(name)?;
        if !is_blob_name(&name) {
            return Err(VaultError::InvalidFileName(name));
        }
        let path = self.full_path(&name);
        write_new(&path, data)?;
        Ok(path)
    }

    /// Write or replace a non-blob file (previews, decrypted output)
    pub fn write_file(&self, name: &str, data: &[u8]) -> VaultResult<PathBuf> {
        let name = sanitize_file_name(name)?;
        if is_blob_name(&name) {
            return Err(VaultError::InvalidFileName(name));
        }
        let path = self.full_path(&name);
        write_atomic(&path, data)?;
        Ok(path)
    }

    /// Read a file by name
    pub fn read_file(&self, name: &str) -> VaultResult<Vec<u8>> {
        let path = self.full_path(&sanitize_file_name(name)?);

        if !path.is_file() {
            return Err(VaultError::FileNotFound(name.to_string()));
        }

        Ok(fs::read(&path)?)
    }

    /// Check if file exists
    pub fn exists(&self, name: &str) -> bool {
        sanitize_file_name(name)
            .map(|n| self.full_path(&n).is_file())
            .unwrap_or(false)
    }

    /// Number of `.enc` blobs directly under the root
    pub fn count_blobs(&self) -> usize {
        if !self.root.is_dir() {
            return 0;
        }

        WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| is_blob_name(&e.file_name().to_string_lossy()))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_secure_fs() {
        let dir = tempdir().unwrap();
        let fs = SecureFs::new(dir.path());

        fs.write_file("notes.txt", b"first").unwrap();
        assert!(fs.exists("notes.txt"));
        fs.write_file("notes.txt", b"replacement").unwrap();
        assert_eq!(fs.read_file("notes.txt").unwrap(), b"replacement");

        assert!(matches!(fs.read_file("missing.enc"), Err(VaultError::FileNotFound(_))));
    }

    #[test]
    fn test_blobs_are_never_replaced() {
        let dir = tempdir().unwrap();
        let fs = SecureFs::new(dir.path());

        fs.write_blob("data.enc", b"encrypted data").unwrap();
        assert!(matches!(fs.write_blob("data.enc", b"other"), Err(VaultError::IoError(_))));
        assert!(matches!(fs.write_file("data.enc", b"other"), Err(VaultError::InvalidFileName(_))));
        assert!(matches!(fs.write_file("DATA.ENC", b"other"), Err(VaultError::InvalidFileName(_))));
        assert_eq!(fs.read_file("data.enc").unwrap(), b"encrypted data");

        assert!(matches!(fs.write_blob("plain.txt", b"x"), Err(VaultError::InvalidFileName(_))));

        // Only the blob is left behind
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["data.enc".to_string()]);
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("store.bin");

        write_atomic(&target, b"one").unwrap();
        write_atomic(&target, b"two").unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["store.bin".to_string()]);
        assert_eq!(std::fs::read(&target).unwrap(), b"two");
    }

    #[test]
    fn test_atomic_write_creates_parent() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("nested").join("store.bin");

        write_atomic(&target, b"data").unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"data");
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("report.pdf").unwrap(), "report.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\x\\notes.txt").unwrap(), "notes.txt");
        assert_eq!(sanitize_file_name("..hidden").unwrap(), "hidden");
        assert_eq!(sanitize_file_name("a\u{0}b?.txt").unwrap(), "ab.txt");

        assert!(sanitize_file_name("..").is_err());
        assert!(sanitize_file_name("dir/").is_err());
        assert!(sanitize_file_name("").is_err());
    }

    #[test]
    fn test_blob_naming() {
        let a = SecureFs::blob_name("../report.pdf").unwrap();
        let b = SecureFs::blob_name("report.pdf").unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("report.pdf."));
        assert!(a.ends_with(".enc"));
        assert_eq!(a.len(), "report.pdf.".len() + BLOB_TAG_LEN + ".enc".len());

        assert_eq!(SecureFs::decrypted_name(&a).unwrap(), "decrypted_report.pdf");
        assert_eq!(SecureFs::decrypted_name("report.pdf.enc").unwrap(), "decrypted_report.pdf");
        assert_eq!(SecureFs::decrypted_name("plain.bin").unwrap(), "decrypted_plain.bin");
        assert_eq!(SecureFs::decrypted_name("v1.cafe").unwrap(), "decrypted_v1.cafe");

        assert!(SecureFs::decrypted_name("../").is_err());
        assert!(SecureFs::decrypted_name("y.txt.enc.enc").is_err());
        assert!(SecureFs::decrypted_name(&format!("{}.enc", a)).is_err());
    }

    #[test]
    fn test_count_blobs() {
        let dir = tempdir().unwrap();
        let fs = SecureFs::new(dir.path());
        assert_eq!(fs.count_blobs(), 0);

        fs.write_blob("a.txt.enc", b"x").unwrap();
        fs.write_blob("b.pdf.enc", b"y").unwrap();
        fs.write_file("decrypted_a.txt", b"z").unwrap();
        assert_eq!(fs.count_blobs(), 2);

        assert_eq!(SecureFs::new(&dir.path().join("absent")).count_blobs(), 0);
    }
}
