use crate::detector::{DetectorError, DetectorOptions, FaceDetector};
use crate::expression::{ExpressionError, ExpressionNet};
use crate::geometry::DisplaySize;
use crate::types::DetectionResult;
use image::GrayImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("frame buffer holds {actual} bytes, {width}x{height} needs {expected}")]
    BadFrame {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("expression classifier: {0}")]
    Expression(#[from] ExpressionError),
}

/// Face detector and expression classifier run back to back.
#[derive(Debug)]
pub struct FaceAnalyzer {
    detector: FaceDetector,
    expressions: ExpressionNet,
}

impl FaceAnalyzer {
    pub fn new(detector: FaceDetector, expressions: ExpressionNet) -> Self {
        Self { detector, expressions }
    }

    /// Detect every face in a grayscale frame and classify its expression.
    ///
    /// Boxes are in frame pixels; `image_dims` of each result is the frame size.
    pub fn analyze(
        &mut self,
        gray: &[u8],
        width: u32,
        height: u32,
        options: &DetectorOptions,
    ) -> Result<Vec<DetectionResult>, AnalyzeError> {
        let expected = width as usize * height as usize;
        let frame = gray
            .get(..expected)
            .and_then(|px| GrayImage::from_raw(width, height, px.to_vec()))
            .ok_or(AnalyzeError::BadFrame {
                width,
                height,
                expected,
                actual: gray.len(),
            })?;

        let faces = self.detector.detect(&frame, options)?;
        let image_dims = DisplaySize::new(width, height);

        let mut results = Vec::with_capacity(faces.len());
        for face in faces {
            let expressions = self.expressions.classify(&frame, &face.bbox)?;
            results.push(DetectionResult {
                bbox: face.bbox,
                score: face.score,
                expressions,
                image_dims,
            });
        }
        Ok(results)
    }
}
