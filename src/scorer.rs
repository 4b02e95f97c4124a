//! BioKey Vault - Advisory Scorer
//!
//! Optional genuine/forged classifier over the composite watermark. Its
//! verdict is logged and reported; it never takes part in admission.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};
use crate::fingerprint::FingerprintHash;

/// Classifier label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Forged,
    Genuine,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Forged => write!(f, "forged"),
            Verdict::Genuine => write!(f, "genuine"),
        }
    }
}

/// Scorer output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Advisory {
    pub label: Verdict,
    /// Probability of `label` (0.0 - 1.0)
    pub confidence: f32,
}

/// Black-box scorer
pub trait AdvisoryScorer: Send + Sync {
    /// Whether a model is actually loaded
    fn is_loaded(&self) -> bool;

    fn score(&self, composite: &RgbImage) -> VaultResult<Advisory>;
}

/// Scorer used when no model is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NullScorer;

impl AdvisoryScorer for NullScorer {
    fn is_loaded(&self) -> bool {
        false
    }

    fn score(&self, _composite: &RgbImage) -> VaultResult<Advisory> {
        Err(VaultError::ScorerUnavailable("no model loaded".into()))
    }
}

/// Run the scorer and log the outcome. Failures become `None`.
pub fn advise(scorer: &dyn AdvisoryScorer, composite: &RgbImage, hash: &FingerprintHash) -> Option<Advisory> {
    match scorer.score(composite) {
        Ok(advisory) => {
            log::debug!(
                "Advisory for {}: {} ({:.2})",
                hash.short(),
                advisory.label,
                advisory.confidence
            );
            Some(advisory)
        }
        Err(e) => {
            log::debug!("Advisory for {} unavailable: {}", hash.short(), e);
            None
        }
    }
}

/// Build the configured scorer, falling back to `NullScorer`
pub fn load_scorer(model: Option<&Path>) -> Arc<dyn AdvisoryScorer> {
    let Some(path) = model else {
        return Arc::new(NullScorer);
    };

    #[cfg(feature = "ai")]
    {
        match LinearScorer::load(path) {
            Ok(scorer) => {
                log::info!("Advisory model loaded from {}", path.display());
                Arc::new(scorer)
            }
            Err(e) => {
                log::warn!("Advisory model not loaded ({}), continuing without it", e);
                Arc::new(NullScorer)
            }
        }
    }

    #[cfg(not(feature = "ai"))]
    {
        log::warn!(
            "Advisory model {} configured but built without the `ai` feature",
            path.display()
        );
        Arc::new(NullScorer)
    }
}

#[cfg(feature = "ai")]
pub use linear::{LinearModel, LinearScorer};

#[cfg(feature = "ai")]
mod linear {
    use std::path::Path;

    use image::imageops::{self, FilterType};
    use image::RgbImage;
    use ndarray::{Array1, Array2};
    use serde::{Deserialize, Serialize};

    use super::{Advisory, AdvisoryScorer, Verdict};
    use crate::error::{VaultError, VaultResult};

    /// Weight file: row 0 scores `forged`, row 1 scores `genuine`.
    /// Inputs are the composite resized to `input_size`, channel-interleaved,
    /// each value mapped to `(x / 255 - 0.5) / 0.5`.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct LinearModel {
        pub input_size: u32,
        pub weights: Vec<Vec<f32>>,
        pub bias: [f32; 2],
    }

    /// Two-class linear model with softmax output
    pub struct LinearScorer {
        input_size: u32,
        weights: Array2<f32>,
        bias: Array1<f32>,
    }

    impl LinearScorer {
        pub fn load(path: &Path) -> VaultResult<Self> {
            let data = std::fs::read(path)?;
            let model: LinearModel = serde_json::from_slice(&data)?;
            Self::from_model(model)
        }

        pub fn from_model(model: LinearModel) -> VaultResult<Self> {
            let features = (model.input_size * model.input_size * 3) as usize;
            if model.input_size == 0
                || model.weights.len() != 2
                || model.weights.iter().any(|row| row.len() != features)
            {
                return Err(VaultError::ScorerUnavailable(format!(
                    "weights must be 2 x {} for input size {}",
                    features, model.input_size
                )));
            }

            let flat: Vec<f32> = model.weights.into_iter().flatten().collect();
            let weights = Array2::from_shape_vec((2, features), flat)
                .map_err(|e| VaultError::ScorerUnavailable(e.to_string()))?;

            Ok(Self {
                input_size: model.input_size,
                weights,
                bias: Array1::from(model.bias.to_vec()),
            })
        }

        fn features(&self, composite: &RgbImage) -> Array1<f32> {
            let small = imageops::resize(composite, self.input_size, self.input_size, FilterType::Triangle);
            small
                .into_raw()
                .into_iter()
                .map(|v| (v as f32 / 255.0 - 0.5) / 0.5)
                .collect()
        }
    }

    impl AdvisoryScorer for LinearScorer {
        fn is_loaded(&self) -> bool {
            true
        }

        fn score(&self, composite: &RgbImage) -> VaultResult<Advisory> {
            let logits = self.weights.dot(&self.features(composite)) + &self.bias;

            let max = logits.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            let exp = logits.mapv(|v| (v - max).exp());
            let probs = &exp / exp.sum();

            if !probs.iter().all(|p| p.is_finite()) {
                return Err(VaultError::ScorerUnavailable("non-finite output".into()));
            }

            let (label, confidence) = if probs[1] >= probs[0] {
                (Verdict::Genuine, probs[1])
            } else {
                (Verdict::Forged, probs[0])
            };
            Ok(Advisory { label, confidence })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(feature = "ai")]
    use image::Rgb;

    #[test]
    fn test_null_scorer_is_unavailable() {
        let composite = RgbImage::new(8, 8);
        let hash = FingerprintHash::of_pixels(composite.as_raw());

        assert!(!NullScorer.is_loaded());
        assert!(matches!(NullScorer.score(&composite), Err(VaultError::ScorerUnavailable(_))));
        assert_eq!(advise(&NullScorer, &composite, &hash), None);
    }

    #[test]
    fn test_unconfigured_model_falls_back() {
        assert!(!load_scorer(None).is_loaded());
        assert!(!load_scorer(Some(Path::new("/nonexistent/model.json"))).is_loaded());
    }

    #[cfg(feature = "ai")]
    #[test]
    fn test_linear_scorer() {
        let size = 2u32;
        let features = (size * size * 3) as usize;
        // Bright images score genuine, dark images forged
        let model = LinearModel {
            input_size: size,
            weights: vec![vec![-1.0; features], vec![1.0; features]],
            bias: [0.0, 0.0],
        };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, serde_json::to_vec(&model).unwrap()).unwrap();
        let scorer = load_scorer(Some(&path));
        assert!(scorer.is_loaded());

        let bright = RgbImage::from_pixel(16, 16, Rgb([255, 255, 255]));
        let advisory = scorer.score(&bright).unwrap();
        assert_eq!(advisory.label, Verdict::Genuine);
        assert!(advisory.confidence > 0.99);

        let dark = RgbImage::from_pixel(16, 16, Rgb([0, 0, 0]));
        assert_eq!(scorer.score(&dark).unwrap().label, Verdict::Forged);

        let grey = RgbImage::from_pixel(16, 16, Rgb([128, 128, 128]));
        let advisory = scorer.score(&grey).unwrap();
        assert!((advisory.confidence - 0.5).abs() < 0.05);
    }

    #[cfg(feature = "ai")]
    #[test]
    fn test_linear_model_shape_checked() {
        let model = LinearModel {
            input_size: 4,
            weights: vec![vec![0.0; 3], vec![0.0; 3]],
            bias: [0.0, 0.0],
        };
        assert!(LinearScorer::from_model(model).is_err());
    }
}
