//! Lightweight face detector via ONNX Runtime.
//!
//! Expects an UltraFace-style export: one `scores` tensor `[1, N, 2]`
//! (background, face) and one `boxes` tensor `[1, N, 4]` holding normalized
//! corner coordinates. Candidates are thresholded, suppressed with NMS and
//! mapped back to frame pixels.

use crate::geometry::BoundingBox;
use crate::models::BundleManifest;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const DETECTOR_MEAN: f32 = 127.0;
const DETECTOR_STD: f32 = 128.0;
const DETECTOR_NMS_THRESHOLD: f32 = 0.3;
const DEFAULT_INPUT_SIZE: u32 = 224;
const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("empty frame")]
    EmptyFrame,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Per-call detector settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorOptions {
    /// Square working resolution (ignored when the model has a fixed input).
    pub input_size: u32,
    /// Minimum face score kept, in [0, 1].
    pub score_threshold: f32,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
        }
    }
}

/// A face candidate in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceCandidate {
    pub bbox: BoundingBox,
    pub score: f32,
}

#[derive(Debug)]
pub struct FaceDetector {
    session: Session,
    /// Fixed `(width, height)` from the manifest, if the export is not dynamic.
    fixed_input: Option<(u32, u32)>,
    scores_idx: usize,
    boxes_idx: usize,
}

impl FaceDetector {
    pub fn load(model_path: &Path, manifest: &BundleManifest) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if output_names.len() < 2 {
            return Err(DetectorError::InferenceFailed(format!(
                "face detector requires 2 outputs (scores, boxes), got {}",
                output_names.len()
            )));
        }
        let (scores_idx, boxes_idx) = discover_output_indices(&output_names);

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            scores_idx,
            boxes_idx,
            fixed_input = ?manifest.input,
            "loaded face detector"
        );

        Ok(Self {
            session,
            fixed_input: manifest.input.map(|[w, h]| (w, h)),
            scores_idx,
            boxes_idx,
        })
    }

    /// Working resolution used for a call with `options`.
    pub fn input_dims(&self, options: &DetectorOptions) -> (u32, u32) {
        self.fixed_input
            .unwrap_or((options.input_size, options.input_size))
    }

    /// Detect faces in a grayscale frame, sorted by descending score.
    pub fn detect(
        &mut self,
        frame: &GrayImage,
        options: &DetectorOptions,
    ) -> Result<Vec<FaceCandidate>, DetectorError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(DetectorError::EmptyFrame);
        }

        let (input_w, input_h) = self.input_dims(options);
        let input = preprocess(frame, input_w, input_h);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, scores) = outputs[self.scores_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("scores: {e}")))?;
        let (_, boxes) = outputs[self.boxes_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("boxes: {e}")))?;

        let candidates = decode_candidates(
            scores,
            boxes,
            frame.width() as f32,
            frame.height() as f32,
            options.score_threshold,
        );
        let faces = nms(candidates, DETECTOR_NMS_THRESHOLD);

        tracing::trace!(faces = faces.len(), input_w, input_h, "face detection done");
        Ok(faces)
    }
}

/// Resize to the working resolution and build a normalized NCHW tensor.
/// Grayscale is replicated into all three channels.
fn preprocess(frame: &GrayImage, input_w: u32, input_h: u32) -> Array4<f32> {
    let resized = imageops::resize(frame, input_w, input_h, FilterType::Triangle);
    let (w, h) = (input_w as usize, input_h as usize);

    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let v = (pixel.0[0] as f32 - DETECTOR_MEAN) / DETECTOR_STD;
        let (x, y) = (x as usize, y as usize);
        tensor[[0, 0, y, x]] = v;
        tensor[[0, 1, y, x]] = v;
        tensor[[0, 2, y, x]] = v;
    }
    tensor
}

/// Output ordering: by name (`scores`, `boxes`), otherwise `[0] = scores, [1] = boxes`.
fn discover_output_indices(names: &[String]) -> (usize, usize) {
    let scores = names.iter().position(|n| n == "scores");
    let boxes = names.iter().position(|n| n == "boxes");
    match (scores, boxes) {
        (Some(s), Some(b)) => (s, b),
        _ => {
            tracing::info!(?names, "detector output names not recognized, using positional mapping");
            (0, 1)
        }
    }
}

/// Turn raw `scores`/`boxes` slices into frame-space candidates.
fn decode_candidates(
    scores: &[f32],
    boxes: &[f32],
    frame_w: f32,
    frame_h: f32,
    threshold: f32,
) -> Vec<FaceCandidate> {
    let count = (scores.len() / 2).min(boxes.len() / 4);
    let mut out = Vec::new();

    for i in 0..count {
        let score = scores[i * 2 + 1];
        if !score.is_finite() || score < threshold {
            continue;
        }
        let b = &boxes[i * 4..i * 4 + 4];
        let bbox = BoundingBox::from_corners(b[0] * frame_w, b[1] * frame_h, b[2] * frame_w, b[3] * frame_h)
            .clamped(frame_w, frame_h);
        if bbox.width <= 0.0 || bbox.height <= 0.0 {
            continue;
        }
        out.push(FaceCandidate { bbox, score });
    }

    out
}

/// Greedy non-maximum suppression; output is sorted by descending score.
fn nms(mut candidates: Vec<FaceCandidate>, iou_threshold: f32) -> Vec<FaceCandidate> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep: Vec<FaceCandidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if keep.iter().all(|k| k.bbox.iou(&candidate.bbox) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}
