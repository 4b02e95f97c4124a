//! BioKey Vault - Preview Artifacts
//!
//! Write-only PNGs of the composite watermark and short text previews of
//! decrypted payloads. Nothing here is ever read back by the vault.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{ImageFormat, RgbImage};

use crate::error::{VaultError, VaultResult};
use crate::fingerprint::FingerprintHash;
use crate::secure_fs::SecureFs;

/// Bytes shown by `text_preview`
pub const TEXT_PREVIEW_LEN: usize = 5000;

/// Extensions that get a text preview
const TEXT_EXTENSIONS: &[&str] = &["txt", "csv", "json", "log", "md"];

/// Which operation produced the composite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewKind {
    Register,
    Access,
}

/// `<prefix>_wm.png` or `access_<prefix>_wm.png`
pub fn preview_name(hash: &FingerprintHash, kind: PreviewKind) -> String {
    match kind {
        PreviewKind::Register => format!("{}_wm.png", hash.short()),
        PreviewKind::Access => format!("access_{}_wm.png", hash.short()),
    }
}

/// Encode a composite as PNG
pub fn encode_png(composite: &RgbImage) -> VaultResult<Vec<u8>> {
    let mut output = Vec::new();
    composite
        .write_to(&mut Cursor::new(&mut output), ImageFormat::Png)
        .map_err(|e| VaultError::SerializationError(e.to_string()))?;
    Ok(output)
}

/// Write the composite preview
pub fn write_preview(
    fs: &SecureFs,
    hash: &FingerprintHash,
    composite: &RgbImage,
    kind: PreviewKind,
) -> VaultResult<PathBuf> {
    fs.write_file(&preview_name(hash, kind), &encode_png(composite)?)
}

/// `write_preview` that logs instead of failing
pub fn write_preview_best_effort(
    fs: &SecureFs,
    hash: &FingerprintHash,
    composite: &RgbImage,
    kind: PreviewKind,
) -> Option<PathBuf> {
    match write_preview(fs, hash, composite, kind) {
        Ok(path) => Some(path),
        Err(e) => {
            log::warn!("Preview for {} not written: {}", hash.short(), e);
            None
        }
    }
}

/// First `TEXT_PREVIEW_LEN` bytes as lossy UTF-8, for text-like files only
pub fn text_preview(file_name: &str, content: &[u8]) -> Option<String> {
    let ext = Path::new(file_name).extension()?.to_str()?.to_ascii_lowercase();
    if !TEXT_EXTENSIONS.contains(&ext.as_str()) {
        return None;
    }

    let end = content.len().min(TEXT_PREVIEW_LEN);
    Some(String::from_utf8_lossy(&content[..end]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::tempdir;

    #[test]
    fn test_preview_names() {
        let hash = FingerprintHash::of_pixels(b"pixels");
        let prefix = hash.short();

        assert_eq!(preview_name(&hash, PreviewKind::Register), format!("{}_wm.png", prefix));
        assert_eq!(preview_name(&hash, PreviewKind::Access), format!("access_{}_wm.png", prefix));
    }

    #[test]
    fn test_write_preview() {
        let dir = tempdir().unwrap();
        let fs = SecureFs::new(dir.path());
        let composite = RgbImage::from_pixel(16, 16, Rgb([10, 20, 30]));
        let hash = FingerprintHash::of_pixels(composite.as_raw());

        let path = write_preview(&fs, &hash, &composite, PreviewKind::Register).unwrap();
        let decoded = image::open(&path).unwrap().into_rgb8();
        assert_eq!(decoded, composite);
    }

    #[test]
    fn test_best_effort_preview_swallows_errors() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        // Root is a regular file, so nothing can be created under it
        let fs = SecureFs::new(&blocker);
        let composite = RgbImage::new(4, 4);
        let hash = FingerprintHash::of_pixels(composite.as_raw());

        assert!(write_preview_best_effort(&fs, &hash, &composite, PreviewKind::Access).is_none());
    }

    #[test]
    fn test_text_preview() {
        assert_eq!(text_preview("notes.TXT", b"hello").as_deref(), Some("hello"));
        assert_eq!(text_preview("data.bin", b"hello"), None);
        assert_eq!(text_preview("README", b"hello"), None);

        let long = vec![b'a'; TEXT_PREVIEW_LEN + 100];
        assert_eq!(text_preview("big.log", &long).unwrap().len(), TEXT_PREVIEW_LEN);

        let lossy = text_preview("x.csv", &[0xff, b'a']).unwrap();
        assert!(lossy.ends_with('a'));
    }
}
