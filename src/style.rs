//! Style profiling
//!
//! Per text region, recovers enough typography to render a convincing
//! replacement: dominant glyph color (background-excluded centroid),
//! estimated font size from the region geometry, and a normal/bold weight
//! guess from edge density.

use image::{imageops, GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use imageproc::gradients::sobel_gradients;
use tracing::debug;

use crate::config::StyleConfig;
use crate::types::BBox;

/// Gradient magnitude above which a pixel counts toward stroke density.
const EDGE_MAGNITUDE: u16 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontWeight {
    Normal,
    Bold,
}

/// Typography recovered from one text region.
#[derive(Debug, Clone, Copy)]
pub struct StyleProfile {
    pub color: Rgb<u8>,
    pub font_px: f32,
    pub weight: FontWeight,
}

/// Profiles regions against whole-image statistics computed once per call.
pub struct StyleProfiler<'a> {
    image: &'a RgbImage,
    luma: GrayImage,
    edges: ImageBuffer<Luma<u16>, Vec<u16>>,
    background_luma: u8,
    config: &'a StyleConfig,
}

impl<'a> StyleProfiler<'a> {
    pub fn new(image: &'a RgbImage, config: &'a StyleConfig) -> Self {
        let luma = imageops::grayscale(image);
        let edges = sobel_gradients(&luma);
        let background_luma = modal_luma(&luma);
        Self {
            image,
            luma,
            edges,
            background_luma,
            config,
        }
    }

    /// Estimated background luminance (histogram mode) for the whole image.
    pub fn background_luma(&self) -> u8 {
        self.background_luma
    }

    pub fn profile(&self, bbox: &BBox) -> StyleProfile {
        let font_px = (bbox.height() as f32 * self.config.font_height_ratio)
            .max(self.config.min_font_px);

        let Some(interior) = bbox.shrink(self.config.edge_margin) else {
            // Too small to sample; fall back to white, the most common text
            // color on dark chart themes.
            return StyleProfile {
                color: Rgb([255, 255, 255]),
                font_px,
                weight: FontWeight::Normal,
            };
        };

        let color = self.dominant_color(&interior);
        let weight = self.estimate_weight(&interior);
        debug!(?bbox, ?color, font_px, ?weight, "region style profiled");

        StyleProfile {
            color,
            font_px,
            weight,
        }
    }

    /// Centroid color of interior pixels away from the modal background
    /// luminance. Falls back to the brightest interior pixel, then white.
    fn dominant_color(&self, interior: &BBox) -> Rgb<u8> {
        let mut sum = [0u64; 3];
        let mut count = 0u64;
        let mut brightest: Option<(u8, Rgb<u8>)> = None;

        for y in interior.y1..interior.y2 {
            for x in interior.x1..interior.x2 {
                let l = self.luma.get_pixel(x, y).0[0];
                let p = *self.image.get_pixel(x, y);

                if brightest.map_or(true, |(bl, _)| l > bl) {
                    brightest = Some((l, p));
                }
                if l.abs_diff(self.background_luma) <= self.config.background_exclusion {
                    continue;
                }
                for c in 0..3 {
                    sum[c] += p.0[c] as u64;
                }
                count += 1;
            }
        }

        if count > 0 {
            Rgb([
                (sum[0] / count) as u8,
                (sum[1] / count) as u8,
                (sum[2] / count) as u8,
            ])
        } else {
            brightest.map(|(_, p)| p).unwrap_or(Rgb([255, 255, 255]))
        }
    }

    /// Bold when the normalized edge-pixel density exceeds the calibrated
    /// threshold: heavier strokes put more gradient energy per unit area.
    fn estimate_weight(&self, interior: &BBox) -> FontWeight {
        let mut edge_pixels = 0u64;
        for y in interior.y1..interior.y2 {
            for x in interior.x1..interior.x2 {
                if self.edges.get_pixel(x, y).0[0] > EDGE_MAGNITUDE {
                    edge_pixels += 1;
                }
            }
        }
        let density = edge_pixels as f32 / interior.area().max(1) as f32;
        if density > self.config.bold_edge_density {
            FontWeight::Bold
        } else {
            FontWeight::Normal
        }
    }
}

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

#[cfg(test)]
mod tests {
    use super::*;

    const BG: Rgb<u8> = Rgb([18, 22, 30]);
    const TEXT: Rgb<u8> = Rgb([80, 220, 120]);

    /// Vertical strokes inside the region: `stroke_w` text columns, then
    /// background up to `period`, repeating. Strokes must be narrower than
    /// the gap pattern's period or they read as a solid block.
    fn canvas_with_text(region: BBox, stroke_w: u32, period: u32) -> RgbImage {
        let mut img = RgbImage::from_pixel(200, 120, BG);
        for y in region.y1 + 3..region.y2 - 3 {
            for x in region.x1 + 3..region.x2 - 3 {
                if (x - region.x1 - 3) % period < stroke_w {
                    img.put_pixel(x, y, TEXT);
                }
            }
        }
        img
    }

    #[test]
    fn test_dominant_color_ignores_background() {
        let region = BBox::new(40, 40, 120, 70);
        let img = canvas_with_text(region, 1, 3);
        let config = StyleConfig::default();
        let profiler = StyleProfiler::new(&img, &config);

        let profile = profiler.profile(&region);
        for c in 0..3 {
            assert!(
                profile.color.0[c].abs_diff(TEXT.0[c]) <= 4,
                "channel {c}: {:?} vs {:?}",
                profile.color,
                TEXT
            );
        }
    }

    #[test]
    fn test_font_size_from_height() {
        let img = RgbImage::from_pixel(200, 120, BG);
        let config = StyleConfig::default();
        let profiler = StyleProfiler::new(&img, &config);

        // 30px tall region -> 24px font.
        let profile = profiler.profile(&BBox::new(40, 40, 120, 70));
        assert!((profile.font_px - 24.0).abs() < 1e-3);

        // 6px tall region floors at 8px.
        let profile = profiler.profile(&BBox::new(40, 40, 120, 46));
        assert!((profile.font_px - 8.0).abs() < 1e-3);
    }

    #[test]
    fn test_degenerate_region_falls_back_to_white() {
        let img = RgbImage::from_pixel(200, 120, BG);
        let config = StyleConfig::default();
        let profiler = StyleProfiler::new(&img, &config);

        let profile = profiler.profile(&BBox::new(40, 40, 43, 43));
        assert_eq!(profile.color, Rgb([255, 255, 255]));
    }

    #[test]
    fn test_weight_estimation() {
        let region = BBox::new(40, 40, 120, 70);
        let config = StyleConfig::default();

        // Heavy strokes, 2px wide with 1px gaps: the gradient fires on both
        // flanks of every stroke, so roughly two thirds of the interior
        // counts as edge -> bold.
        let dense = canvas_with_text(region, 2, 3);
        let profiler = StyleProfiler::new(&dense, &config);
        assert_eq!(profiler.profile(&region).weight, FontWeight::Bold);

        // Thin, widely spaced strokes: two edge columns per 12px period stay
        // well under the threshold -> normal.
        let sparse = canvas_with_text(region, 1, 12);
        let profiler = StyleProfiler::new(&sparse, &config);
        assert_eq!(profiler.profile(&region).weight, FontWeight::Normal);
    }
}
