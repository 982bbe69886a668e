//! Overlay surface: boxes and expression labels drawn over the video.

use ab_glyph::{FontVec, PxScale};
use emoscope_core::{DetectionResult, DisplaySize};
use emoscope_hw::Frame;
use image::{imageops, Pixel, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use thiserror::Error;

const BOX_COLOR: Rgba<u8> = Rgba([0, 160, 255, 255]);
const LABEL_BG: Rgba<u8> = Rgba([0, 0, 0, 160]);
const LABEL_FG: Rgba<u8> = Rgba([255, 255, 255, 255]);
const LABEL_HEIGHT: u32 = 18;
const LABEL_SCALE: f32 = 16.0;
const BOX_THICKNESS: i32 = 2;

/// Fonts tried, in order, when none is configured.
pub const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/truetype/liberation2/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation-sans/LiberationSans-Regular.ttf",
];

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("reading font {}: {source}", .path.display())]
    FontIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid font {}", .0.display())]
    FontInvalid(PathBuf),
    #[error("writing preview {}: {source}", .path.display())]
    Preview {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("publishing preview {}: {source}", .path.display())]
    PreviewRename {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A drawing surface the detection loop renders into.
pub trait OverlaySurface {
    fn size(&self) -> DisplaySize;
    fn set_size(&mut self, size: DisplaySize);
    /// Erase everything drawn so far.
    fn clear(&mut self);
    fn draw_detection(&mut self, detection: &DetectionResult);
    /// Push the finished overlay out, together with the frame it annotates.
    fn present(&mut self, frame: &Frame) -> Result<(), OverlayError>;
}

/// Label text for a detection, e.g. `happy (0.93)`.
pub fn detection_label(detection: &DetectionResult) -> String {
    match detection.expressions.dominant() {
        Some((expression, p)) => format!("{expression} ({p:.2})"),
        None => format!("face ({:.2})", detection.score),
    }
}

/// Transparent RGBA overlay rasterized with `imageproc`.
pub struct RasterOverlay {
    image: RgbaImage,
    font: Option<FontVec>,
    preview_path: Option<PathBuf>,
    mirror_preview: bool,
}

impl RasterOverlay {
    pub fn new() -> Self {
        Self {
            image: RgbaImage::new(0, 0),
            font: None,
            preview_path: None,
            mirror_preview: false,
        }
    }

    /// Load a TTF/OTF font for label text. Without one only label tabs are drawn.
    pub fn with_font(mut self, path: &Path) -> Result<Self, OverlayError> {
        self.font = Some(load_font(path)?);
        Ok(self)
    }

    /// Use the first candidate that loads. Leaves the overlay fontless if none does.
    pub fn with_first_font<P: AsRef<Path>>(mut self, candidates: &[P]) -> Self {
        for path in candidates.iter().map(AsRef::as_ref) {
            match load_font(path) {
                Ok(font) => {
                    tracing::debug!(path = %path.display(), "using label font");
                    self.font = Some(font);
                    break;
                }
                Err(e) => tracing::trace!(error = %e, "font candidate skipped"),
            }
        }
        self
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Write a composited PNG after every cycle. With `mirror`, the frame is
    /// flipped horizontally to match mirrored boxes.
    pub fn with_preview(mut self, path: PathBuf, mirror: bool) -> Self {
        self.preview_path = Some(path);
        self.mirror_preview = mirror;
        self
    }

    /// Overlay composited over the (optionally mirrored) frame.
    pub fn composite(&self, frame: &Frame) -> RgbaImage {
        let mut base = RgbaImage::from_fn(frame.width, frame.height, |x, y| {
            let v = frame
                .data
                .get(y as usize * frame.width as usize + x as usize)
                .copied()
                .unwrap_or(0);
            Rgba([v, v, v, 255])
        });
        if self.mirror_preview {
            imageops::flip_horizontal_in_place(&mut base);
        }
        for (x, y, top) in self.image.enumerate_pixels() {
            if top.0[3] == 0 || x >= base.width() || y >= base.height() {
                continue;
            }
            base.get_pixel_mut(x, y).blend(top);
        }
        base
    }

    fn write_preview(&self, path: &Path, frame: &Frame) -> Result<(), OverlayError> {
        let composite = self.composite(frame);
        let tmp = path.with_extension("tmp.png");
        composite.save(&tmp).map_err(|source| OverlayError::Preview {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, path).map_err(|source| OverlayError::PreviewRename {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn load_font(path: &Path) -> Result<FontVec, OverlayError> {
    let bytes = std::fs::read(path).map_err(|source| OverlayError::FontIo {
        path: path.to_path_buf(),
        source,
    })?;
    FontVec::try_from_vec(bytes).map_err(|_| OverlayError::FontInvalid(path.to_path_buf()))
}

impl Default for RasterOverlay {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlaySurface for RasterOverlay {
    fn size(&self) -> DisplaySize {
        DisplaySize::new(self.image.width(), self.image.height())
    }

    fn set_size(&mut self, size: DisplaySize) {
        self.image = RgbaImage::new(size.width, size.height);
    }

    fn clear(&mut self) {
        for px in self.image.pixels_mut() {
            *px = Rgba([0, 0, 0, 0]);
        }
    }

    fn draw_detection(&mut self, detection: &DetectionResult) {
        let b = detection.bbox.clamped(self.image.width() as f32, self.image.height() as f32);
        let (w, h) = (b.width.round() as u32, b.height.round() as u32);
        if w == 0 || h == 0 {
            return;
        }
        let (x, y) = (b.x.round() as i32, b.y.round() as i32);

        for t in 0..BOX_THICKNESS {
            let tw = w.saturating_sub(2 * t as u32);
            let th = h.saturating_sub(2 * t as u32);
            if tw == 0 || th == 0 {
                break;
            }
            draw_hollow_rect_mut(&mut self.image, Rect::at(x + t, y + t).of_size(tw, th), BOX_COLOR);
        }

        // Label tab sits above the box, or inside it at the top edge.
        let label = detection_label(detection);
        let label_y = if y >= LABEL_HEIGHT as i32 { y - LABEL_HEIGHT as i32 } else { y };
        let label_w = (label.len() as u32 * 8 + 6).min(self.image.width().max(1));
        draw_filled_rect_mut(
            &mut self.image,
            Rect::at(x, label_y).of_size(label_w, LABEL_HEIGHT),
            LABEL_BG,
        );
        if let Some(font) = &self.font {
            draw_text_mut(
                &mut self.image,
                LABEL_FG,
                x + 3,
                label_y + 1,
                PxScale::from(LABEL_SCALE),
                font,
                &label,
            );
        }
    }

    fn present(&mut self, frame: &Frame) -> Result<(), OverlayError> {
        match &self.preview_path {
            Some(path) => self.write_preview(path, frame),
            None => Ok(()),
        }
    }
}
