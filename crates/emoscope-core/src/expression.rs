//! Facial expression classifier via ONNX Runtime.
//!
//! FER+-style model: a single-channel face crop in, one logit per label out.

use crate::geometry::BoundingBox;
use crate::models::BundleManifest;
use crate::types::{Expression, ExpressionScores, UnknownExpression};
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const DEFAULT_INPUT: (u32, u32) = (64, 64);

/// Output order of the stock FER+ export.
const FERPLUS_LABELS: [&str; 8] = [
    "neutral",
    "happiness",
    "surprise",
    "sadness",
    "anger",
    "disgust",
    "fear",
    "contempt",
];

#[derive(Error, Debug)]
pub enum ExpressionError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("manifest label: {0}")]
    UnknownLabel(#[from] UnknownExpression),
    #[error("face crop is empty: {0:?}")]
    EmptyCrop(BoundingBox),
    #[error("model produced {actual} logits, manifest has {expected} labels")]
    LabelMismatch { expected: usize, actual: usize },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

#[derive(Debug)]
pub struct ExpressionNet {
    session: Session,
    input: (u32, u32),
    labels: Vec<Expression>,
}

impl ExpressionNet {
    pub fn load(model_path: &Path, manifest: &BundleManifest) -> Result<Self, ExpressionError> {
        if !model_path.exists() {
            return Err(ExpressionError::ModelNotFound(model_path.display().to_string()));
        }

        let labels = match &manifest.labels {
            Some(names) => parse_labels(names.iter().map(String::as_str))?,
            None => parse_labels(FERPLUS_LABELS.iter().copied())?,
        };

        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;

        let input = manifest.input.map(|[w, h]| (w, h)).unwrap_or(DEFAULT_INPUT);
        tracing::info!(
            path = %model_path.display(),
            ?input,
            labels = labels.len(),
            "loaded expression classifier"
        );

        Ok(Self { session, input, labels })
    }

    /// Classify the face inside `bbox` (frame pixel coordinates).
    pub fn classify(
        &mut self,
        frame: &GrayImage,
        bbox: &BoundingBox,
    ) -> Result<ExpressionScores, ExpressionError> {
        let crop = crop_face(frame, bbox).ok_or(ExpressionError::EmptyCrop(*bbox))?;
        let input = preprocess(&crop, self.input.0, self.input.1);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ExpressionError::InferenceFailed(format!("logits: {e}")))?;

        scores_from_logits(logits, &self.labels)
    }
}

fn parse_labels<'a>(names: impl Iterator<Item = &'a str>) -> Result<Vec<Expression>, UnknownExpression> {
    names.map(str::parse).collect()
}

/// Cut the box out of the frame, clamped to its bounds.
fn crop_face(frame: &GrayImage, bbox: &BoundingBox) -> Option<GrayImage> {
    let clamped = bbox.clamped(frame.width() as f32, frame.height() as f32);
    let x = clamped.x.floor() as u32;
    let y = clamped.y.floor() as u32;
    let w = (clamped.right().ceil() as u32).min(frame.width()).saturating_sub(x);
    let h = (clamped.bottom().ceil() as u32).min(frame.height()).saturating_sub(y);
    if w == 0 || h == 0 {
        return None;
    }
    Some(imageops::crop_imm(frame, x, y, w, h).to_image())
}

/// FER+ takes raw 0–255 intensities, no normalization.
fn preprocess(crop: &GrayImage, input_w: u32, input_h: u32) -> Array4<f32> {
    let resized = imageops::resize(crop, input_w, input_h, FilterType::Triangle);
    let mut tensor = Array4::<f32>::zeros((1, 1, input_h as usize, input_w as usize));
    for (x, y, pixel) in resized.enumerate_pixels() {
        tensor[[0, 0, y as usize, x as usize]] = pixel.0[0] as f32;
    }
    tensor
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum > 0.0 {
        exps.into_iter().map(|e| e / sum).collect()
    } else {
        vec![0.0; logits.len()]
    }
}

fn scores_from_logits(logits: &[f32], labels: &[Expression]) -> Result<ExpressionScores, ExpressionError> {
    if logits.len() != labels.len() {
        return Err(ExpressionError::LabelMismatch {
            expected: labels.len(),
            actual: logits.len(),
        });
    }
    let probs = softmax(logits);
    Ok(ExpressionScores::from_pairs(labels.iter().copied().zip(probs)))
}
