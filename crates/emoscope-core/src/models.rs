//! Model bundles on disk.
//!
//! A bundle named `foo` is `foo.onnx` under the base directory, plus an
//! optional `foo.json` manifest overriding input size and label order.

use crate::analyzer::FaceAnalyzer;
use crate::detector::{DetectorError, FaceDetector};
use crate::expression::{ExpressionError, ExpressionNet};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_DETECTOR_BUNDLE: &str = "tiny_face_detector";
pub const DEFAULT_EXPRESSION_BUNDLE: &str = "face_expression";

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("model bundle {name} not found at {}", .path.display())]
    BundleNotFound { name: String, path: PathBuf },
    #[error("bad manifest for {name}: {source}")]
    Manifest {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("face detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("expression classifier: {0}")]
    Expression(#[from] ExpressionError),
    #[error("model loader task failed: {0}")]
    Worker(String),
}

/// Optional per-bundle metadata (`<name>.json`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BundleManifest {
    /// Fixed `[width, height]` input of the export.
    pub input: Option<[u32; 2]>,
    /// Output label order, for classifiers.
    pub labels: Option<Vec<String>>,
}

/// Names of the two bundles needed before detection can start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleNames {
    pub detector: String,
    pub expression: String,
}

impl Default for BundleNames {
    fn default() -> Self {
        Self {
            detector: DEFAULT_DETECTOR_BUNDLE.to_string(),
            expression: DEFAULT_EXPRESSION_BUNDLE.to_string(),
        }
    }
}

/// A located bundle: model path plus parsed manifest.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub name: String,
    pub model_path: PathBuf,
    pub manifest: BundleManifest,
}

impl Bundle {
    /// Locate `<name>.onnx` under `base_dir` and read its manifest if present.
    pub fn locate(base_dir: &Path, name: &str) -> Result<Self, ModelLoadError> {
        let model_path = base_dir.join(format!("{name}.onnx"));
        if !model_path.is_file() {
            return Err(ModelLoadError::BundleNotFound {
                name: name.to_string(),
                path: model_path,
            });
        }

        let manifest_path = base_dir.join(format!("{name}.json"));
        let manifest = match std::fs::read_to_string(&manifest_path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|source| ModelLoadError::Manifest {
                name: name.to_string(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BundleManifest::default(),
            Err(source) => {
                return Err(ModelLoadError::Io {
                    path: manifest_path,
                    source,
                })
            }
        };

        Ok(Self {
            name: name.to_string(),
            model_path,
            manifest,
        })
    }
}

/// Load both bundles and build the analyzer. Blocking.
pub fn load_analyzer(base_dir: &Path, names: &BundleNames) -> Result<FaceAnalyzer, ModelLoadError> {
    let detector_bundle = Bundle::locate(base_dir, &names.detector)?;
    let expression_bundle = Bundle::locate(base_dir, &names.expression)?;

    let detector = FaceDetector::load(&detector_bundle.model_path, &detector_bundle.manifest)?;
    let expressions = ExpressionNet::load(&expression_bundle.model_path, &expression_bundle.manifest)?;

    tracing::info!(
        base_dir = %base_dir.display(),
        detector = %detector_bundle.name,
        expression = %expression_bundle.name,
        "model bundles loaded"
    );
    Ok(FaceAnalyzer::new(detector, expressions))
}

/// `$XDG_DATA_HOME/emoscope/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("emoscope/models")
}
