use crate::geometry::{BoundingBox, DisplaySize};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Facial expression labels, in canonical order.
///
/// The declaration order is also the tie-break order used by
/// [`ExpressionScores::dominant`]: on equal probabilities the earlier
/// variant wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expression {
    Neutral,
    Happy,
    Sad,
    Angry,
    Fearful,
    Disgusted,
    Surprised,
}

impl Expression {
    pub const ALL: [Expression; 7] = [
        Expression::Neutral,
        Expression::Happy,
        Expression::Sad,
        Expression::Angry,
        Expression::Fearful,
        Expression::Disgusted,
        Expression::Surprised,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            Expression::Neutral => "neutral",
            Expression::Happy => "happy",
            Expression::Sad => "sad",
            Expression::Angry => "angry",
            Expression::Fearful => "fearful",
            Expression::Disgusted => "disgusted",
            Expression::Surprised => "surprised",
        }
    }

    /// Uppercase label, as shown in the status line.
    pub fn as_upper(self) -> String {
        self.label().to_ascii_uppercase()
    }
}

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown expression label: {0}")]
pub struct UnknownExpression(pub String);

impl FromStr for Expression {
    type Err = UnknownExpression;

    /// Accepts canonical labels and the noun forms used by FER-style models.
    /// `contempt` has no slot of its own and folds into `Disgusted`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "neutral" => Ok(Expression::Neutral),
            "happy" | "happiness" => Ok(Expression::Happy),
            "sad" | "sadness" => Ok(Expression::Sad),
            "angry" | "anger" => Ok(Expression::Angry),
            "fearful" | "fear" | "scared" => Ok(Expression::Fearful),
            "disgusted" | "disgust" | "contempt" => Ok(Expression::Disgusted),
            "surprised" | "surprise" => Ok(Expression::Surprised),
            other => Err(UnknownExpression(other.to_string())),
        }
    }
}

/// Probability per expression; sums to ≈1 when produced by a classifier.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ExpressionScores {
    values: [f32; 7],
}

impl ExpressionScores {
    /// Accumulate `(label, probability)` pairs and renormalize to sum 1.
    ///
    /// Several pairs may land on the same expression (e.g. disgust and
    /// contempt); their probabilities add. Non-finite or negative inputs
    /// count as zero.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (Expression, f32)>,
    {
        let mut values = [0.0f32; 7];
        for (expression, p) in pairs {
            if p.is_finite() && p > 0.0 {
                values[expression.index()] += p;
            }
        }
        let total: f32 = values.iter().sum();
        if total > 0.0 {
            for v in values.iter_mut() {
                *v /= total;
            }
        }
        Self { values }
    }

    pub fn get(&self, expression: Expression) -> f32 {
        self.values[expression.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Expression, f32)> + '_ {
        Expression::ALL.iter().map(|&e| (e, self.values[e.index()]))
    }

    /// The expression with the highest probability, with its value.
    ///
    /// Ties go to the expression earliest in [`Expression::ALL`]. Returns
    /// `None` when every score is zero.
    pub fn dominant(&self) -> Option<(Expression, f32)> {
        let mut best: Option<(Expression, f32)> = None;
        for (expression, p) in self.iter() {
            if p.is_nan() || p <= 0.0 {
                continue;
            }
            match best {
                Some((_, best_p)) if p <= best_p => {}
                _ => best = Some((expression, p)),
            }
        }
        best
    }
}

/// One detected face with its expression distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub bbox: BoundingBox,
    /// Detector confidence in [0, 1].
    pub score: f32,
    pub expressions: ExpressionScores,
    /// Resolution `bbox` is expressed in.
    pub image_dims: DisplaySize,
}

impl DetectionResult {
    /// Rescale from `image_dims` to `display`.
    ///
    /// A box covering fraction `f` of the working width covers the same
    /// fraction of `display.width` afterwards; likewise for height.
    pub fn resized(&self, display: DisplaySize) -> Self {
        if self.image_dims.is_empty() {
            return Self {
                image_dims: display,
                ..self.clone()
            };
        }
        let sx = display.width as f32 / self.image_dims.width as f32;
        let sy = display.height as f32 / self.image_dims.height as f32;
        Self {
            bbox: self.bbox.scaled(sx, sy),
            image_dims: display,
            ..self.clone()
        }
    }

    /// Mirror the box across the X axis of `image_dims`.
    pub fn mirrored(&self) -> Self {
        Self {
            bbox: self.bbox.mirrored(self.image_dims.width as f32),
            ..self.clone()
        }
    }

    pub fn dominant_expression(&self) -> Option<Expression> {
        self.expressions.dominant().map(|(e, _)| e)
    }
}

/// Rescale a batch of detections to the display size.
pub fn resize_results(detections: &[DetectionResult], display: DisplaySize) -> Vec<DetectionResult> {
    detections.iter().map(|d| d.resized(display)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn scores(pairs: &[(Expression, f32)]) -> ExpressionScores {
        ExpressionScores::from_pairs(pairs.iter().copied())
    }

    fn detection(bbox: BoundingBox, dims: DisplaySize) -> DetectionResult {
        DetectionResult {
            bbox,
            score: 0.9,
            expressions: ExpressionScores::default(),
            image_dims: dims,
        }
    }

    #[test]
    fn test_dominant_happy() {
        let s = scores(&[
            (Expression::Happy, 0.7),
            (Expression::Neutral, 0.2),
            (Expression::Sad, 0.1),
        ]);
        let (e, p) = s.dominant().unwrap();
        assert_eq!(e, Expression::Happy);
        assert!((p - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_dominant_tie_uses_canonical_order() {
        let s = scores(&[(Expression::Surprised, 0.5), (Expression::Sad, 0.5)]);
        assert_eq!(s.dominant().unwrap().0, Expression::Sad);

        let s = scores(&[(Expression::Happy, 0.5), (Expression::Neutral, 0.5)]);
        assert_eq!(s.dominant().unwrap().0, Expression::Neutral);
    }

    #[test]
    fn test_dominant_all_zero() {
        assert!(ExpressionScores::default().dominant().is_none());
    }

    #[test]
    fn test_from_pairs_accumulates_and_normalizes() {
        let s = scores(&[
            (Expression::Disgusted, 1.0),
            (Expression::Disgusted, 1.0),
            (Expression::Happy, 2.0),
            (Expression::Sad, f32::NAN),
            (Expression::Angry, -3.0),
        ]);
        assert!((s.get(Expression::Disgusted) - 0.5).abs() < 1e-6);
        assert!((s.get(Expression::Happy) - 0.5).abs() < 1e-6);
        assert_eq!(s.get(Expression::Sad), 0.0);
        assert_eq!(s.get(Expression::Angry), 0.0);
        let total: f32 = s.iter().map(|(_, p)| p).sum();
        assert!((total - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_expression_aliases() {
        assert_eq!("happiness".parse::<Expression>().unwrap(), Expression::Happy);
        assert_eq!("Surprise".parse::<Expression>().unwrap(), Expression::Surprised);
        assert_eq!("contempt".parse::<Expression>().unwrap(), Expression::Disgusted);
        assert_eq!("fear".parse::<Expression>().unwrap(), Expression::Fearful);
        assert!("bored".parse::<Expression>().is_err());
        assert_eq!(Expression::Happy.as_upper(), "HAPPY");
    }

    #[test]
    fn test_resized_doubles() {
        let d = detection(
            BoundingBox::new(10.0, 20.0, 30.0, 40.0),
            DisplaySize::new(320, 240),
        );
        let r = d.resized(DisplaySize::new(640, 480));
        assert_eq!(r.bbox, BoundingBox::new(20.0, 40.0, 60.0, 80.0));
        assert_eq!(r.image_dims, DisplaySize::new(640, 480));
        assert_eq!(r.score, d.score);
    }

    #[test]
    fn test_resized_then_mirrored() {
        let d = detection(
            BoundingBox::new(10.0, 20.0, 30.0, 40.0),
            DisplaySize::new(320, 240),
        );
        let out = resize_results(&[d], DisplaySize::new(640, 480));
        let m = out[0].mirrored();
        // 640 - 20 - 60
        assert_eq!(m.bbox.x, 560.0);
        assert_eq!(m.bbox.width, 60.0);
    }

    proptest! {
        #[test]
        fn prop_resize_is_scale_consistent(
            src_w in 1u32..2000,
            src_h in 1u32..2000,
            dst_w in 1u32..2000,
            dst_h in 1u32..2000,
            fx in 0.0f32..1.0,
            fw in 0.0f32..1.0,
        ) {
            let src = DisplaySize::new(src_w, src_h);
            let dst = DisplaySize::new(dst_w, dst_h);
            let d = detection(
                BoundingBox::new(fx * src_w as f32, 0.0, fw * src_w as f32, 1.0),
                src,
            );
            let r = d.resized(dst);
            let frac_x = r.bbox.x / dst_w as f32;
            let frac_w = r.bbox.width / dst_w as f32;
            prop_assert!((frac_x - fx).abs() < 1e-4);
            prop_assert!((frac_w - fw).abs() < 1e-4);
        }
    }
}
