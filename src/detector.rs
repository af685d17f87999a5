//! Built-in local bounding-box detector
//!
//! A classical, model-free text detector: estimates the modal background
//! luminance, thresholds foreground pixels, labels connected components, and
//! merges horizontally adjacent components into text-line boxes. It stands in
//! for an external detector so the pipeline runs hermetically; any other
//! `BoxDetector` can be injected instead.

use anyhow::Result;
use image::{imageops, GrayImage, Luma, RgbImage};
use imageproc::region_labelling::{connected_components, Connectivity};
use tracing::debug;

use crate::resolver::BoxDetector;
use crate::types::{BBox, DetectedBox};

/// Luminance-threshold connected-component detector.
#[derive(Debug, Clone)]
pub struct LumaRegionDetector {
    /// Luminance distance from the modal background that marks foreground.
    pub foreground_threshold: u8,
    /// Minimum pixels per connected component.
    pub min_component_area: u32,
    /// Minimum component height; thinner blobs are noise or hairlines.
    pub min_component_height: u32,
    /// Components with a side ratio beyond this are line-like, not text.
    pub max_aspect_ratio: f32,
}

impl Default for LumaRegionDetector {
    fn default() -> Self {
        Self {
            foreground_threshold: 40,
            min_component_area: 8,
            min_component_height: 4,
            max_aspect_ratio: 15.0,
        }
    }
}

impl BoxDetector for LumaRegionDetector {
    fn detect_boxes(&self, image: &RgbImage, hint: Option<BBox>) -> Result<Vec<DetectedBox>> {
        let (width, height) = image.dimensions();
        let scope = hint
            .and_then(|h| h.clamp_to(width, height))
            .unwrap_or_else(|| BBox::new(0, 0, width, height));

        let view = imageops::crop_imm(image, scope.x1, scope.y1, scope.width(), scope.height())
            .to_image();
        let gray = imageops::grayscale(&view);
        let background = modal_luma(&gray);

        // Foreground = anything far enough from the modal background.
        let binary = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
            let l = gray.get_pixel(x, y).0[0];
            if l.abs_diff(background) > self.foreground_threshold {
                Luma([255u8])
            } else {
                Luma([0u8])
            }
        });

        let labels = connected_components(&binary, Connectivity::Eight, Luma([0u8]));

        // Per-label extents and pixel counts.
        let mut extents: Vec<(u32, u32, u32, u32, u32)> = Vec::new();
        for y in 0..labels.height() {
            for x in 0..labels.width() {
                let label = labels.get_pixel(x, y).0[0] as usize;
                if label == 0 {
                    continue;
                }
                if extents.len() < label {
                    extents.resize(label, (u32::MAX, u32::MAX, 0, 0, 0));
                }
                let e = &mut extents[label - 1];
                e.0 = e.0.min(x);
                e.1 = e.1.min(y);
                e.2 = e.2.max(x + 1);
                e.3 = e.3.max(y + 1);
                e.4 += 1;
            }
        }

        let mut components: Vec<(BBox, u32)> = Vec::new();
        for (x1, y1, x2, y2, count) in extents {
            if count < self.min_component_area {
                continue;
            }
            let b = BBox::new(x1, y1, x2, y2);
            if b.height() < self.min_component_height || b.width() < 2 {
                continue;
            }
            let aspect = b.width().max(b.height()) as f32 / b.width().min(b.height()).max(1) as f32;
            if aspect > self.max_aspect_ratio {
                // Grid lines and borders, not glyphs.
                continue;
            }
            components.push((b, count));
        }

        let merged = merge_into_lines(components);
        debug!(scope = ?scope, boxes = merged.len(), "local detection complete");

        Ok(merged
            .into_iter()
            .map(|(bbox, count)| {
                let density = count as f32 / bbox.area().max(1) as f32;
                DetectedBox {
                    bbox: BBox::new(
                        bbox.x1 + scope.x1,
                        bbox.y1 + scope.y1,
                        bbox.x2 + scope.x1,
                        bbox.y2 + scope.y1,
                    ),
                    confidence: (0.5 + density).clamp(0.5, 0.95),
                }
            })
            .collect())
    }
}

/// Most common luminance value, taken as the background.
fn modal_luma(gray: &GrayImage) -> u8 {
    let mut histogram = [0u32; 256];
    for p in gray.pixels() {
        histogram[p.0[0] as usize] += 1;
    }
    histogram
        .iter()
        .enumerate()
        .max_by_key(|(_, &n)| n)
        .map(|(v, _)| v as u8)
        .unwrap_or(0)
}

/// Merge glyph components on the same baseline into text-line boxes.
fn merge_into_lines(mut components: Vec<(BBox, u32)>) -> Vec<(BBox, u32)> {
    components.sort_by_key(|(b, _)| (b.y1, b.x1));

    let mut changed = true;
    while changed {
        changed = false;
        'outer: for i in 0..components.len() {
            for j in (i + 1)..components.len() {
                if should_merge(&components[i].0, &components[j].0) {
                    let (b_j, n_j) = components.remove(j);
                    let (b_i, n_i) = &mut components[i];
                    *b_i = b_i.union_rect(&b_j);
                    *n_i += n_j;
                    changed = true;
                    continue 'outer;
                }
            }
        }
    }

    components
}

fn should_merge(a: &BBox, b: &BBox) -> bool {
    // Vertical overlap of at least half the shorter box.
    let overlap = a.y2.min(b.y2).saturating_sub(a.y1.max(b.y1));
    if overlap * 2 < a.height().min(b.height()) {
        return false;
    }
    // Horizontal gap no wider than the taller box (roughly one glyph).
    let gap = if a.x2 <= b.x1 {
        b.x1 - a.x2
    } else if b.x2 <= a.x1 {
        a.x1 - b.x2
    } else {
        0
    };
    gap <= a.height().max(b.height())
}
