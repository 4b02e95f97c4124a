//! BioKey Vault - Watermark Fingerprint
//!
//! Turns two biometric images into a composite watermark and its SHA-256
//! fingerprint:
//!
//! ```text
//! sample A ──► RGB ──► crop-to-fill S×S ─────────────────┐
//!                                                        ├─► blend(α) ──► composite ──► SHA-256
//! sample B ──► RGB ──► crop-to-fill S×S ──► tile permute ┘
//! ```
//!
//! Matching is exact: any pixel difference in either input gives an
//! unrelated fingerprint.

use std::fmt;
use std::str::FromStr;

use image::{imageops, imageops::FilterType, DynamicImage, GenericImageView, RgbImage};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{VaultError, VaultResult};

/// Fingerprint length in bytes
pub const FINGERPRINT_LEN: usize = 32;

/// Hex characters used when an identifier is logged
pub const SHORT_ID_LEN: usize = 8;

/// Seed of the fixed tile permutation
pub const DEFAULT_PERMUTATION_SEED: u64 = 12345;

// ═══════════════════════════════════════════════════════════════════════════
// FINGERPRINT HASH
// ═══════════════════════════════════════════════════════════════════════════

/// SHA-256 over the raw composite pixels
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FingerprintHash([u8; FINGERPRINT_LEN]);

impl FingerprintHash {
    /// Full 64-char hex form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Truncated, non-reversible form for logs and file names
    pub fn short(&self) -> String {
        hex::encode(&self.0[..SHORT_ID_LEN / 2])
    }

    /// Hash raw pixel bytes
    pub fn of_pixels(pixels: &[u8]) -> Self {
        Self(Sha256::digest(pixels).into())
    }
}

impl fmt::Display for FingerprintHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for FingerprintHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FingerprintHash({}…)", self.short())
    }
}

impl FromStr for FingerprintHash {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; FINGERPRINT_LEN];
        hex::decode_to_slice(s.trim(), &mut bytes)
            .map_err(|e| VaultError::SerializationError(format!("invalid fingerprint hex: {}", e)))?;
        Ok(Self(bytes))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════

/// Where the tile permutation comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PermutationSource {
    /// Same permutation for every call
    Fixed { seed: u64 },
    /// Seeded from the normalized pixels of sample B
    SampleDerived,
}

impl Default for PermutationSource {
    fn default() -> Self {
        PermutationSource::Fixed {
            seed: DEFAULT_PERMUTATION_SEED,
        }
    }
}

/// Deriver parameters. Changing any of them changes every fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// Side length S of the normalized samples
    pub image_size: u32,
    /// Tiles per side T (S must be divisible by T)
    pub tiles: u32,
    /// Weight of sample A in the blend
    pub blend_alpha: f64,
    pub permutation: PermutationSource,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            image_size: 128,
            tiles: 8,
            blend_alpha: 0.5,
            permutation: PermutationSource::default(),
        }
    }
}

impl FingerprintConfig {
    pub fn validate(&self) -> VaultResult<()> {
        if self.image_size == 0 || self.tiles == 0 {
            return Err(VaultError::Configuration("image_size and tiles must be positive".into()));
        }
        if self.image_size % self.tiles != 0 {
            return Err(VaultError::Configuration(format!(
                "image_size {} is not divisible by tiles {}",
                self.image_size, self.tiles
            )));
        }
        validate_alpha(self.blend_alpha)
    }
}

fn validate_alpha(alpha: f64) -> VaultResult<()> {
    if !(0.0..=1.0).contains(&alpha) {
        return Err(VaultError::Configuration(format!("blend alpha {} outside [0, 1]", alpha)));
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// TILE PERMUTATION
// ═══════════════════════════════════════════════════════════════════════════

/// Rubik-style tile shuffle: output tile `i` is input tile `order[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilePermutation {
    tiles: u32,
    order: Vec<usize>,
}

impl TilePermutation {
    /// Fisher-Yates over a ChaCha20 stream, stable across platforms
    pub fn from_seed(tiles: u32, seed: u64) -> Self {
        let n = (tiles * tiles) as usize;
        let mut order: Vec<usize> = (0..n).collect();
        let mut rng = ChaCha20Rng::seed_from_u64(seed);

        for i in (1..n).rev() {
            let j = rng.gen_range(0..=i);
            order.swap(i, j);
        }

        Self { tiles, order }
    }

    pub fn identity(tiles: u32) -> Self {
        Self {
            tiles,
            order: (0..(tiles * tiles) as usize).collect(),
        }
    }

    pub fn tiles(&self) -> u32 {
        self.tiles
    }

    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Reassemble `img` with tiles moved to their permuted positions
    pub fn apply(&self, img: &RgbImage) -> VaultResult<RgbImage> {
        let (width, height) = img.dimensions();
        if width != height || width % self.tiles != 0 {
            let side = width - width % self.tiles;
            return Err(VaultError::DimensionMismatch {
                left: (width, height),
                right: (side, side),
            });
        }

        let tile = width / self.tiles;
        let mut out = RgbImage::new(width, height);

        for (dst, &src) in self.order.iter().enumerate() {
            let (src_x, src_y) = self.origin(src, tile);
            let (dst_x, dst_y) = self.origin(dst, tile);

            let piece = imageops::crop_imm(img, src_x, src_y, tile, tile).to_image();
            imageops::replace(&mut out, &piece, dst_x as i64, dst_y as i64);
        }

        Ok(out)
    }

    fn origin(&self, index: usize, tile: u32) -> (u32, u32) {
        let index = index as u32;
        ((index % self.tiles) * tile, (index / self.tiles) * tile)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DERIVER
// ═══════════════════════════════════════════════════════════════════════════

/// Output of a derivation
#[derive(Debug, Clone)]
pub struct Derivation {
    pub hash: FingerprintHash,
    pub composite: RgbImage,
}

/// Stateless fingerprint deriver, built once at startup
#[derive(Debug, Clone)]
pub struct FingerprintDeriver {
    config: FingerprintConfig,
    fixed: Option<TilePermutation>,
}

impl FingerprintDeriver {
    /// Validates the configuration; fails fast on bad geometry
    pub fn new(config: FingerprintConfig) -> VaultResult<Self> {
        config.validate()?;

        let fixed = match config.permutation {
            PermutationSource::Fixed { seed } => Some(TilePermutation::from_seed(config.tiles, seed)),
            PermutationSource::SampleDerived => None,
        };

        Ok(Self { config, fixed })
    }

    pub fn config(&self) -> &FingerprintConfig {
        &self.config
    }

    /// Derive with the configured alpha
    pub fn derive(&self, sample_a: &[u8], sample_b: &[u8]) -> VaultResult<Derivation> {
        self.derive_with_alpha(sample_a, sample_b, self.config.blend_alpha)
    }

    /// Derive from encoded image bytes
    pub fn derive_with_alpha(&self, sample_a: &[u8], sample_b: &[u8], alpha: f64) -> VaultResult<Derivation> {
        let a = decode(sample_a)?;
        let b = decode(sample_b)?;
        self.derive_images(&a, &b, alpha)
    }

    /// Derive from decoded images
    pub fn derive_images(&self, sample_a: &DynamicImage, sample_b: &DynamicImage, alpha: f64) -> VaultResult<Derivation> {
        validate_alpha(alpha)?;

        let a = self.normalize(sample_a)?;
        let b = self.normalize(sample_b)?;
        let b = self.permutation_for(&b).apply(&b)?;

        let composite = blend(&a, &b, alpha)?;
        let hash = FingerprintHash::of_pixels(composite.as_raw());

        Ok(Derivation { hash, composite })
    }

    /// RGB, centered crop of the largest square, resized to S×S
    pub fn normalize(&self, img: &DynamicImage) -> VaultResult<RgbImage> {
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return Err(VaultError::InvalidImage("empty image".into()));
        }

        let rgb = DynamicImage::ImageRgb8(img.to_rgb8());

        let (crop_x, crop_y, crop_size) = if width > height {
            ((width - height) / 2, 0, height)
        } else {
            (0, (height - width) / 2, width)
        };

        let size = self.config.image_size;
        Ok(rgb
            .crop_imm(crop_x, crop_y, crop_size, crop_size)
            .resize_exact(size, size, FilterType::Lanczos3)
            .into_rgb8())
    }

    fn permutation_for(&self, sample_b: &RgbImage) -> std::borrow::Cow<'_, TilePermutation> {
        match &self.fixed {
            Some(perm) => std::borrow::Cow::Borrowed(perm),
            None => {
                let digest = Sha256::digest(sample_b.as_raw());
                let mut seed = [0u8; 8];
                seed.copy_from_slice(&digest[..8]);
                std::borrow::Cow::Owned(TilePermutation::from_seed(
                    self.config.tiles,
                    u64::from_le_bytes(seed),
                ))
            }
        }
    }
}

/// Decode image bytes in any supported format
pub fn decode(bytes: &[u8]) -> VaultResult<DynamicImage> {
    image::load_from_memory(bytes).map_err(|e| VaultError::InvalidImage(e.to_string()))
}

/// Per-channel `round(alpha * a + (1 - alpha) * b)`
pub fn blend(a: &RgbImage, b: &RgbImage, alpha: f64) -> VaultResult<RgbImage> {
    if a.dimensions() != b.dimensions() {
        return Err(VaultError::DimensionMismatch {
            left: a.dimensions(),
            right: b.dimensions(),
        });
    }

    let (width, height) = a.dimensions();
    let pixels: Vec<u8> = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(&pa, &pb)| (alpha * pa as f64 + (1.0 - alpha) * pb as f64).round() as u8)
        .collect();

    RgbImage::from_raw(width, height, pixels).ok_or(VaultError::DimensionMismatch {
        left: (width, height),
        right: b.dimensions(),
    })
}
