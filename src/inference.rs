//! Inference front-end: loads a per-dataset classifier from a models
//! directory and turns a chunk feature vector into a predicted parameter
//! tuple.
//!
//! The artifact pair is deliberately small: `metadata.json` declares the
//! feature layout, per-feature normalisation and the category table;
//! `model.json` carries the weights of a single-layer softmax classifier.
//! Anything missing or malformed disables inference for the context; it
//! never aborts tuning.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use walkdir::WalkDir;

use crate::cparams::{Codec, Filter, SplitMode};
use crate::features::{Features, FEATURE_NAMES, NUM_FEATURES};

pub const METADATA_FILE: &str = "metadata.json";
pub const MODEL_FILE: &str = "model.json";

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ModelError {
    /// No model artifact under the directory.
    Missing(PathBuf),
    /// Metadata file absent or declaring no categories.
    EmptyMetadata,
    /// An artifact exists but cannot be read or does not fit together.
    Load(String),
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::Missing(dir) => write!(f, "no model found under {}", dir.display()),
            ModelError::EmptyMetadata => write!(f, "Empty metadata"),
            ModelError::Load(msg) => write!(f, "model load error: {msg}"),
        }
    }
}

impl std::error::Error for ModelError {}

// ── Artifacts ────────────────────────────────────────────────────────────────

/// One classifier output class.
#[derive(Debug, Clone, Deserialize)]
pub struct Category {
    pub codec: String,
    pub filter: String,
    pub clevel: u8,
    pub splitmode: String,
}

/// The concrete tuple a category resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictedParams {
    pub codec: Codec,
    pub filter: Filter,
    pub clevel: u8,
    pub splitmode: SplitMode,
}

impl Category {
    pub fn resolve(&self) -> Option<PredictedParams> {
        Some(PredictedParams {
            codec: Codec::from_name(&self.codec)?,
            filter: Filter::from_name(&self.filter)?,
            clevel: self.clevel.clamp(1, 9),
            splitmode: SplitMode::from_name(&self.splitmode)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ModelMetadata {
    features: Vec<String>,
    means: Vec<f64>,
    stds: Vec<f64>,
    categories: Vec<Category>,
}

#[derive(Debug, Deserialize)]
struct ModelWeights {
    /// One row of `features.len()` weights per category.
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
}

// ── Classifier ───────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Classifier {
    meta: ModelMetadata,
    model: ModelWeights,
}

fn find_file(dir: &Path, name: &str) -> Option<PathBuf> {
    WalkDir::new(dir)
        .max_depth(2)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .find(|e| e.file_type().is_file() && e.file_name().to_str() == Some(name))
        .map(|e| e.into_path())
}

impl Classifier {
    /// Loads the artifact pair from `dir` (searched up to two levels deep).
    pub fn load(dir: &Path) -> Result<Classifier, ModelError> {
        if !dir.is_dir() {
            return Err(ModelError::Missing(dir.to_path_buf()));
        }
        let model_path =
            find_file(dir, MODEL_FILE).ok_or_else(|| ModelError::Missing(dir.to_path_buf()))?;
        let meta_path = find_file(dir, METADATA_FILE).ok_or(ModelError::EmptyMetadata)?;

        let meta_raw = std::fs::read_to_string(&meta_path)
            .map_err(|e| ModelError::Load(format!("{}: {e}", meta_path.display())))?;
        let meta: ModelMetadata = serde_json::from_str(&meta_raw)
            .map_err(|e| ModelError::Load(format!("{}: {e}", meta_path.display())))?;
        if meta.categories.is_empty() {
            return Err(ModelError::EmptyMetadata);
        }

        let model_raw = std::fs::read_to_string(&model_path)
            .map_err(|e| ModelError::Load(format!("{}: {e}", model_path.display())))?;
        let model: ModelWeights = serde_json::from_str(&model_raw)
            .map_err(|e| ModelError::Load(format!("{}: {e}", model_path.display())))?;

        let classifier = Classifier { meta, model };
        classifier.validate()?;
        Ok(classifier)
    }

    fn validate(&self) -> Result<(), ModelError> {
        let nfeat = self.meta.features.len();
        if nfeat != NUM_FEATURES
            || self
                .meta
                .features
                .iter()
                .zip(FEATURE_NAMES.iter())
                .any(|(a, b)| a != b)
        {
            return Err(ModelError::Load(format!(
                "feature layout {:?} does not match {:?}",
                self.meta.features, FEATURE_NAMES
            )));
        }
        if self.meta.means.len() != nfeat || self.meta.stds.len() != nfeat {
            return Err(ModelError::Load("normalisation size mismatch".into()));
        }
        let ncat = self.meta.categories.len();
        if self.model.bias.len() != ncat
            || self.model.weights.len() != ncat
            || self.model.weights.iter().any(|row| row.len() != nfeat)
        {
            return Err(ModelError::Load("weight shape mismatch".into()));
        }
        Ok(())
    }

    pub fn ncategories(&self) -> usize {
        self.meta.categories.len()
    }

    pub fn category(&self, index: usize) -> Option<&Category> {
        self.meta.categories.get(index)
    }

    /// Index of the winning category for this feature vector. The softmax is
    /// monotone, so the raw logits decide.
    pub fn predict(&self, features: &Features) -> usize {
        let raw = features.as_array();
        let mut x = [0.0f64; NUM_FEATURES];
        for i in 0..NUM_FEATURES {
            let std = if self.meta.stds[i].abs() > f64::EPSILON {
                self.meta.stds[i]
            } else {
                1.0
            };
            x[i] = (raw[i] - self.meta.means[i]) / std;
        }
        let mut best = 0;
        let mut best_logit = f64::NEG_INFINITY;
        for (cat, (row, bias)) in self
            .model
            .weights
            .iter()
            .zip(self.model.bias.iter())
            .enumerate()
        {
            let logit: f64 = row.iter().zip(x.iter()).map(|(w, v)| w * v).sum::<f64>() + bias;
            if logit > best_logit {
                best_logit = logit;
                best = cat;
            }
        }
        best
    }
}

// ── Prediction histogram ─────────────────────────────────────────────────────

/// Counts how often each category was predicted; the winner seeds the search
/// once inference is exhausted.
#[derive(Debug, Clone)]
pub struct PredictionHistogram {
    counts: Vec<u32>,
}

impl PredictionHistogram {
    pub fn new(ncategories: usize) -> PredictionHistogram {
        PredictionHistogram {
            counts: vec![0; ncategories],
        }
    }

    pub fn record(&mut self, category: usize) {
        if let Some(slot) = self.counts.get_mut(category) {
            *slot += 1;
        }
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().sum()
    }

    /// Most frequently predicted category; ties go to the lowest index.
    pub fn most_predicted(&self) -> Option<usize> {
        if self.total() == 0 {
            return None;
        }
        self.counts
            .iter()
            .enumerate()
            .max_by_key(|(i, &c)| (c, std::cmp::Reverse(*i)))
            .map(|(i, _)| i)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::RefSpeeds;

    fn write_valid_artifacts(dir: &Path) {
        let metadata = serde_json::json!({
            "features": FEATURE_NAMES,
            "means": [1.0, 0.0, 0.0, 4.0, 65536.0],
            "stds": [1.0, 1.0, 1.0, 2.0, 32768.0],
            "categories": [
                {"codec": "zstd", "filter": "shuffle", "clevel": 5, "splitmode": "never"},
                {"codec": "lz4", "filter": "nofilter", "clevel": 1, "splitmode": "always"},
            ],
        });
        // Category 0 wins for compressible chunks (high entropy cratio).
        let model = serde_json::json!({
            "weights": [[1.0, 0.0, 0.0, 0.0, 0.0], [-1.0, 0.0, 0.0, 0.0, 0.0]],
            "bias": [0.0, 0.0],
        });
        std::fs::write(dir.join(METADATA_FILE), metadata.to_string()).unwrap();
        std::fs::write(dir.join(MODEL_FILE), model.to_string()).unwrap();
    }

    #[test]
    fn load_and_predict() {
        let dir = tempfile::tempdir().unwrap();
        write_valid_artifacts(dir.path());
        let clf = Classifier::load(dir.path()).expect("load");
        assert_eq!(clf.ncategories(), 2);

        let mut speeds = RefSpeeds::default();
        let zeros = vec![0u8; 8192];
        let compressible = clf.predict(&crate::features::extract(&zeros, 4, &mut speeds));
        assert_eq!(compressible, 0);

        let params = clf.category(0).unwrap().resolve().expect("resolve");
        assert_eq!(params.codec, Codec::Zstd);
        assert_eq!(params.filter, Filter::Shuffle);
        assert_eq!(params.splitmode, SplitMode::Never);
    }

    #[test]
    fn missing_dir_is_missing() {
        let err = Classifier::load(Path::new("/nonexistent/models")).unwrap_err();
        assert!(matches!(err, ModelError::Missing(_)));
    }

    #[test]
    fn missing_metadata_reports_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MODEL_FILE), "{\"weights\":[],\"bias\":[]}").unwrap();
        let err = Classifier::load(dir.path()).unwrap_err();
        assert!(matches!(err, ModelError::EmptyMetadata));
        assert_eq!(err.to_string(), "Empty metadata");
    }

    #[test]
    fn malformed_model_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        write_valid_artifacts(dir.path());
        std::fs::write(dir.path().join(MODEL_FILE), "not json").unwrap();
        assert!(matches!(
            Classifier::load(dir.path()),
            Err(ModelError::Load(_))
        ));
    }

    #[test]
    fn shape_mismatch_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        write_valid_artifacts(dir.path());
        let model = serde_json::json!({"weights": [[1.0, 2.0]], "bias": [0.0, 0.0]});
        std::fs::write(dir.path().join(MODEL_FILE), model.to_string()).unwrap();
        assert!(matches!(
            Classifier::load(dir.path()),
            Err(ModelError::Load(_))
        ));
    }

    #[test]
    fn artifacts_in_subdirectory_are_found() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("dataset-a");
        std::fs::create_dir(&sub).unwrap();
        write_valid_artifacts(&sub);
        assert!(Classifier::load(dir.path()).is_ok());
    }

    #[test]
    fn histogram_majority_and_ties() {
        let mut h = PredictionHistogram::new(3);
        assert_eq!(h.most_predicted(), None);
        h.record(2);
        h.record(1);
        h.record(2);
        assert_eq!(h.most_predicted(), Some(2));
        assert_eq!(h.total(), 3);
        // Out-of-range records are ignored.
        h.record(99);
        assert_eq!(h.total(), 3);
        let mut tie = PredictionHistogram::new(2);
        tie.record(0);
        tie.record(1);
        assert_eq!(tie.most_predicted(), Some(0));
    }
}
