//! emoscope-core: face detection and expression recognition engine.
//!
//! A lightweight face detector and a FER-style expression classifier, both
//! running via ONNX Runtime, plus the box geometry used to place their
//! output on a display surface.

pub mod analyzer;
pub mod detector;
pub mod expression;
pub mod geometry;
pub mod models;
pub mod types;

pub use analyzer::{AnalyzeError, FaceAnalyzer};
pub use detector::DetectorOptions;
pub use geometry::{BoundingBox, DisplaySize};
pub use models::{default_model_dir, load_analyzer, BundleNames, ModelLoadError};
pub use types::{resize_results, DetectionResult, Expression, ExpressionScores};
