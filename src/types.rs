//! Core data types shared across the editing pipeline.
//!
//! Geometry (bounding boxes), extraction payloads, and the source image
//! wrapper with its estimated compression quality.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in pixel coordinates.
///
/// `(x1, y1)` is the inclusive top-left corner, `(x2, y2)` the exclusive
/// bottom-right corner. A box is valid when `x1 < x2` and `y1 < y2` and both
/// corners lie within the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BBox {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// Check validity against image bounds and a minimum-area threshold.
    pub fn is_valid(&self, img_width: u32, img_height: u32, min_area: u64) -> bool {
        self.x1 < self.x2
            && self.y1 < self.y2
            && self.x2 <= img_width
            && self.y2 <= img_height
            && self.area() >= min_area
    }

    /// Clamp the box to image bounds, returning `None` if nothing remains.
    pub fn clamp_to(&self, img_width: u32, img_height: u32) -> Option<BBox> {
        let clamped = BBox::new(
            self.x1.min(img_width),
            self.y1.min(img_height),
            self.x2.min(img_width),
            self.y2.min(img_height),
        );
        (clamped.x1 < clamped.x2 && clamped.y1 < clamped.y2).then_some(clamped)
    }

    /// Expand by `margin` on every side, clamped to image bounds.
    pub fn dilate(&self, margin: u32, img_width: u32, img_height: u32) -> BBox {
        BBox::new(
            self.x1.saturating_sub(margin),
            self.y1.saturating_sub(margin),
            (self.x2 + margin).min(img_width),
            (self.y2 + margin).min(img_height),
        )
    }

    /// Shrink by `margin` on every side, `None` when the interior collapses.
    pub fn shrink(&self, margin: u32) -> Option<BBox> {
        let x1 = self.x1 + margin;
        let y1 = self.y1 + margin;
        let x2 = self.x2.saturating_sub(margin);
        let y2 = self.y2.saturating_sub(margin);
        (x1 < x2 && y1 < y2).then(|| BBox::new(x1, y1, x2, y2))
    }

    pub fn overlaps(&self, other: &BBox) -> bool {
        self.x1 < other.x2 && other.x1 < self.x2 && self.y1 < other.y2 && other.y1 < self.y2
    }

    pub fn intersection(&self, other: &BBox) -> Option<BBox> {
        let b = BBox::new(
            self.x1.max(other.x1),
            self.y1.max(other.y1),
            self.x2.min(other.x2),
            self.y2.min(other.y2),
        );
        (b.x1 < b.x2 && b.y1 < b.y2).then_some(b)
    }

    /// Smallest rectangle covering both boxes.
    pub fn union_rect(&self, other: &BBox) -> BBox {
        BBox::new(
            self.x1.min(other.x1),
            self.y1.min(other.y1),
            self.x2.max(other.x2),
            self.y2.max(other.y2),
        )
    }

    /// Intersection-over-union, 0.0 when disjoint.
    pub fn iou(&self, other: &BBox) -> f32 {
        let Some(inter) = self.intersection(other) else {
            return 0.0;
        };
        let inter_area = inter.area() as f32;
        let union_area = (self.area() + other.area()) as f32 - inter_area;
        if union_area <= 0.0 {
            0.0
        } else {
            inter_area / union_area
        }
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x1 && x < self.x2 && y >= self.y1 && y < self.y2
    }
}

/// A single (original, translated) text pair supplied by an extraction
/// provider, with an optional approximate location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextExtraction {
    /// Text as it appears on the image.
    pub original: String,
    /// Replacement text to render.
    pub translated: String,
    /// Provider confidence in [0, 1].
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    /// Approximate bounding box, if the provider supplied one.
    #[serde(default)]
    pub bbox: Option<BBox>,
}

fn default_confidence() -> f32 {
    1.0
}

/// A box returned by the local bounding-box detector.
#[derive(Debug, Clone, Copy)]
pub struct DetectedBox {
    pub bbox: BBox,
    pub confidence: f32,
}

/// Per-extraction outcome of an edit call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditStatus {
    /// Text was replaced in place.
    Applied,
    /// The extraction could not be matched to a precise region.
    Skipped,
    /// Replacement applied, but the text was shortened with an ellipsis.
    Truncated,
    /// Background reconstruction failed for this region.
    Failed,
}

/// Input image plus its estimated compression quality.
///
/// The pixel buffer is treated as immutable; the engine always produces a new
/// buffer with identical dimensions.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pixels: RgbImage,
    quality: f32,
}

impl SourceImage {
    /// Wrap an RGB buffer, estimating compression quality from block
    /// artifact energy.
    pub fn from_rgb(pixels: RgbImage) -> Self {
        let quality = estimate_compression_quality(&pixels);
        Self { pixels, quality }
    }

    /// Load from a file on disk.
    pub fn open(path: &Path) -> Result<Self, image::ImageError> {
        let img = image::open(path)?.to_rgb8();
        Ok(Self::from_rgb(img))
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Estimated source compression quality in [0, 100].
    pub fn quality(&self) -> f32 {
        self.quality
    }

    /// Encode as PNG for transport to extraction providers.
    pub fn to_png_bytes(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut bytes = Vec::new();
        let dynimg = image::DynamicImage::ImageRgb8(self.pixels.clone());
        dynimg.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)?;
        Ok(bytes)
    }
}

/// Estimate the source JPEG quality (0-100) from 8x8 block boundary energy.
///
/// Compares the mean luminance step across 8-pixel block boundaries against
/// the mean step inside blocks. Heavily compressed images show discontinuities
/// at boundaries that interior pixels lack.
pub fn estimate_compression_quality(image: &RgbImage) -> f32 {
    let (w, h) = image.dimensions();
    if w < 17 || h < 17 {
        return 95.0;
    }

    let luma = |x: u32, y: u32| -> f32 {
        let p = image.get_pixel(x, y).0;
        0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32
    };

    let mut boundary_sum = 0.0f64;
    let mut boundary_n = 0u64;
    let mut interior_sum = 0.0f64;
    let mut interior_n = 0u64;

    // Vertical boundaries (steps across columns).
    for y in 0..h {
        for x in 0..w - 1 {
            let step = (luma(x + 1, y) - luma(x, y)).abs() as f64;
            if x % 8 == 7 {
                boundary_sum += step;
                boundary_n += 1;
            } else {
                interior_sum += step;
                interior_n += 1;
            }
        }
    }
    // Horizontal boundaries (steps across rows).
    for y in 0..h - 1 {
        for x in 0..w {
            let step = (luma(x, y + 1) - luma(x, y)).abs() as f64;
            if y % 8 == 7 {
                boundary_sum += step;
                boundary_n += 1;
            } else {
                interior_sum += step;
                interior_n += 1;
            }
        }
    }

    if boundary_n == 0 || interior_n == 0 {
        return 95.0;
    }

    let boundary = boundary_sum / boundary_n as f64;
    let interior = (interior_sum / interior_n as f64).max(0.25);
    let ratio = (boundary / interior) as f32;

    // ratio ~1.0 for clean images, grows with block artifacts.
    (95.0 - 30.0 * (ratio - 1.0)).clamp(20.0, 95.0)
}

/// Deterministic seed derived from sampled image content plus a salt.
///
/// Samples roughly a thousand bytes of the buffer so hashing stays cheap on
/// large images while still reflecting their content.
pub fn content_seed(image: &RgbImage, salt: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    salt.hash(&mut hasher);

    let data = image.as_raw();
    let step = (data.len() / 1024).max(1);
    for (i, &byte) in data.iter().enumerate().step_by(step) {
        i.hash(&mut hasher);
        byte.hash(&mut hasher);
    }
    hasher.finish()
}
