//! Background reconstruction
//!
//! Fills masked pixels by boundary-inward propagation: pixels are processed
//! in increasing distance from the mask boundary, each taking a
//! distance-weighted average of already-known pixels in a small neighborhood.
//! Gradient information therefore only flows in from the immediate boundary,
//! never across the whole mask. After filling, grid-line spans that were
//! fully occluded by text are redrawn from their recorded color, making grid
//! continuity independent of inpainting quality.

use std::collections::VecDeque;

use image::RgbImage;
use tracing::{debug, warn};

use crate::config::InpaintConfig;
use crate::error::EditError;
use crate::grid::Orientation;
use crate::mask::{EditMask, OccludedSpan};

/// Inpaint every masked pixel, then repair occluded grid spans.
///
/// Fails with `ReconstructionFailed` when the mask has no known boundary to
/// propagate from (degenerate input such as a fully masked image).
pub fn reconstruct_background(
    image: &mut RgbImage,
    mask: &EditMask,
    config: &InpaintConfig,
) -> Result<(), EditError> {
    let (width, height) = image.dimensions();
    let idx = |x: u32, y: u32| (y * width + x) as usize;

    let mut known = vec![false; (width * height) as usize];
    let mut remaining = 0usize;
    for y in 0..height {
        for x in 0..width {
            if mask.is_set(x, y) {
                remaining += 1;
            } else {
                known[idx(x, y)] = true;
            }
        }
    }
    if remaining == 0 {
        return Ok(());
    }

    // Seed the frontier with masked pixels touching known ones, row-major for
    // deterministic fill order.
    let mut queue: VecDeque<(u32, u32)> = VecDeque::new();
    let mut queued = vec![false; (width * height) as usize];
    for y in 0..height {
        for x in 0..width {
            if !known[idx(x, y)] && has_known_neighbor(&known, x, y, width, height) {
                queue.push_back((x, y));
                queued[idx(x, y)] = true;
            }
        }
    }

    let radius = config.radius.max(1) as i64;
    let mut filled = 0usize;

    while let Some((x, y)) = queue.pop_front() {
        let mut sum = [0.0f32; 3];
        let mut weight_sum = 0.0f32;

        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let nx = x as i64 + dx;
                let ny = y as i64 + dy;
                if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                    continue;
                }
                let (nx, ny) = (nx as u32, ny as u32);
                if !known[idx(nx, ny)] {
                    continue;
                }
                // Closer sources dominate; information stays local.
                let w = 1.0 / (1.0 + (dx * dx + dy * dy) as f32);
                let p = image.get_pixel(nx, ny).0;
                for c in 0..3 {
                    sum[c] += w * p[c] as f32;
                }
                weight_sum += w;
            }
        }

        // BFS order guarantees at least one known 4-neighbor.
        debug_assert!(weight_sum > 0.0);
        let mut value = [0u8; 3];
        for c in 0..3 {
            value[c] = (sum[c] / weight_sum).round().clamp(0.0, 255.0) as u8;
        }
        image.put_pixel(x, y, image::Rgb(value));
        known[idx(x, y)] = true;
        filled += 1;

        for (nx, ny) in neighbors4(x, y, width, height) {
            if !known[idx(nx, ny)] && !queued[idx(nx, ny)] {
                queue.push_back((nx, ny));
                queued[idx(nx, ny)] = true;
            }
        }
    }

    if filled < remaining {
        warn!(
            filled,
            remaining, "mask region unreachable from any known boundary"
        );
        return Err(EditError::ReconstructionFailed(
            "mask has no known boundary to propagate from".into(),
        ));
    }

    repair_occluded_lines(image, &mask.occluded);
    debug!(filled, repaired_spans = mask.occluded.len(), "background reconstructed");
    Ok(())
}

/// Redraw each occluded grid span as a 1px line of its recorded color across
/// the span, extrapolating the line's known position along its axis.
fn repair_occluded_lines(image: &mut RgbImage, spans: &[OccludedSpan]) {
    let (width, height) = image.dimensions();
    for span in spans {
        let line = &span.line;
        match line.orientation {
            Orientation::Horizontal => {
                if line.position >= height {
                    continue;
                }
                for x in span.start..span.end.min(width) {
                    image.put_pixel(x, line.position, line.color);
                }
            }
            Orientation::Vertical => {
                if line.position >= width {
                    continue;
                }
                for y in span.start..span.end.min(height) {
                    image.put_pixel(line.position, y, line.color);
                }
            }
        }
    }
}

fn has_known_neighbor(known: &[bool], x: u32, y: u32, width: u32, height: u32) -> bool {
    neighbors4(x, y, width, height)
        .into_iter()
        .any(|(nx, ny)| known[(ny * width + nx) as usize])
}

fn neighbors4(x: u32, y: u32, width: u32, height: u32) -> Vec<(u32, u32)> {
    let mut out = Vec::with_capacity(4);
    if x > 0 {
        out.push((x - 1, y));
    }
    if y > 0 {
        out.push((x, y - 1));
    }
    if x + 1 < width {
        out.push((x + 1, y));
    }
    if y + 1 < height {
        out.push((x, y + 1));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MaskConfig;
    use crate::grid::{GridLine, GridModel};
    use crate::mask::build_edit_mask;
    use crate::types::BBox;
    use image::Rgb;

    const BG: Rgb<u8> = Rgb([18, 22, 30]);

    fn masked_canvas(regions: &[BBox], grid: &GridModel) -> (RgbImage, EditMask) {
        let img = RgbImage::from_pixel(200, 150, BG);
        let mask = build_edit_mask(200, 150, regions, grid, &MaskConfig::default());
        (img, mask)
    }

    #[test]
    fn test_flat_background_fills_exactly() {
        let (mut img, mask) = masked_canvas(&[BBox::new(40, 40, 100, 70)], &GridModel::default());
        // Scribble over the region to make sure it actually gets replaced.
        for y in 40..70 {
            for x in 40..100 {
                img.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }

        reconstruct_background(&mut img, &mask, &InpaintConfig::default()).unwrap();

        for y in 0..150 {
            for x in 0..200 {
                assert_eq!(*img.get_pixel(x, y), BG, "pixel ({x},{y})");
            }
        }
    }

    #[test]
    fn test_empty_mask_is_noop() {
        let (mut img, mask) = masked_canvas(&[], &GridModel::default());
        let before = img.clone();
        reconstruct_background(&mut img, &mask, &InpaintConfig::default()).unwrap();
        assert_eq!(img.as_raw(), before.as_raw());
    }

    #[test]
    fn test_fully_masked_image_fails() {
        let mut img = RgbImage::from_pixel(32, 32, BG);
        let mask = build_edit_mask(
            32,
            32,
            &[BBox::new(0, 0, 32, 32)],
            &GridModel::default(),
            &MaskConfig::default(),
        );
        let err = reconstruct_background(&mut img, &mask, &InpaintConfig::default()).unwrap_err();
        assert!(matches!(err, EditError::ReconstructionFailed(_)));
    }

    #[test]
    fn test_occluded_line_redrawn() {
        let line_color = Rgb([60, 65, 75]);
        let grid = GridModel {
            lines: vec![GridLine {
                orientation: Orientation::Horizontal,
                position: 55,
                thickness: 1,
                color: line_color,
            }],
        };
        let (mut img, mask) = masked_canvas(&[BBox::new(40, 40, 100, 70)], &grid);
        // The original line under the text.
        for x in 0..200 {
            img.put_pixel(x, 55, line_color);
        }
        // Text pixels covering it inside the box.
        for y in 45..65 {
            for x in 45..95 {
                img.put_pixel(x, y, Rgb([230, 230, 230]));
            }
        }

        reconstruct_background(&mut img, &mask, &InpaintConfig::default()).unwrap();

        assert_eq!(mask.occluded.len(), 1);
        for x in 0..200 {
            assert_eq!(
                *img.get_pixel(x, 55),
                line_color,
                "line must be continuous at x={x}"
            );
        }
    }

    #[test]
    fn test_fill_is_deterministic() {
        let make = || {
            let mut img = RgbImage::from_fn(120, 90, |x, y| {
                Rgb([(x % 64) as u8 + 20, (y % 64) as u8 + 20, 40])
            });
            let mask = build_edit_mask(
                120,
                90,
                &[BBox::new(30, 30, 80, 60)],
                &GridModel::default(),
                &MaskConfig::default(),
            );
            reconstruct_background(&mut img, &mask, &InpaintConfig::default()).unwrap();
            img
        };
        assert_eq!(make().as_raw(), make().as_raw());
    }
}
