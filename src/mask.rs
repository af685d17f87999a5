//! Edit mask construction
//!
//! Derives the set of pixels eligible for modification: the union of dilated
//! text boxes, minus a protection band around every grid line. Where a line
//! passes fully through a text box it cannot be protected in place, so that
//! span stays editable and is recorded for redrawing after inpainting.

use image::{GrayImage, Luma};

use crate::config::MaskConfig;
use crate::grid::{GridLine, GridModel, Orientation};
use crate::types::BBox;

/// A grid-line segment hidden under a text box, to be redrawn after
/// background reconstruction. `start..end` runs along the line axis.
#[derive(Debug, Clone)]
pub struct OccludedSpan {
    pub line: GridLine,
    pub start: u32,
    pub end: u32,
}

/// Per-pixel edit eligibility (255 = editable) plus repair bookkeeping.
#[derive(Debug)]
pub struct EditMask {
    pub mask: GrayImage,
    pub occluded: Vec<OccludedSpan>,
    /// Region boxes after dilation, in input order.
    pub dilated: Vec<BBox>,
}

impl EditMask {
    pub fn is_set(&self, x: u32, y: u32) -> bool {
        self.mask.get_pixel(x, y).0[0] == 255
    }

    pub fn is_empty(&self) -> bool {
        self.mask.pixels().all(|p| p.0[0] == 0)
    }
}

/// Build the edit mask for one call.
pub fn build_edit_mask(
    width: u32,
    height: u32,
    regions: &[BBox],
    grid: &GridModel,
    config: &MaskConfig,
) -> EditMask {
    let dilated: Vec<BBox> = regions
        .iter()
        .map(|b| b.dilate(config.dilation_margin, width, height))
        .collect();

    let mut mask = GrayImage::new(width, height);
    for b in &dilated {
        for y in b.y1..b.y2 {
            for x in b.x1..b.x2 {
                mask.put_pixel(x, y, Luma([255u8]));
            }
        }
    }

    let mut occluded = Vec::new();
    for line in &grid.lines {
        let half = line.thickness / 2 + config.grid_protection_margin;
        let (lo, hi, extent) = match line.orientation {
            Orientation::Horizontal => (
                line.position.saturating_sub(half),
                (line.position + half + 1).min(height),
                width,
            ),
            Orientation::Vertical => (
                line.position.saturating_sub(half),
                (line.position + half + 1).min(width),
                height,
            ),
        };
        if lo >= hi {
            continue;
        }

        // Spans where the band lies strictly inside a text box cannot be
        // protected; keep them editable and schedule the line for repair.
        let spans = occluded_spans(line, lo, hi, &dilated);

        for across in lo..hi {
            for along in 0..extent {
                if spans.iter().any(|&(s, e)| along >= s && along < e) {
                    continue;
                }
                let (x, y) = match line.orientation {
                    Orientation::Horizontal => (along, across),
                    Orientation::Vertical => (across, along),
                };
                mask.put_pixel(x, y, Luma([0u8]));
            }
        }

        occluded.extend(spans.into_iter().map(|(start, end)| OccludedSpan {
            line: *line,
            start,
            end,
        }));
    }

    EditMask {
        mask,
        occluded,
        dilated,
    }
}

/// Merged spans (along the line axis) where the protection band sits strictly
/// inside a dilated text box.
fn occluded_spans(line: &GridLine, lo: u32, hi: u32, boxes: &[BBox]) -> Vec<(u32, u32)> {
    let mut spans: Vec<(u32, u32)> = boxes
        .iter()
        .filter_map(|b| {
            let (across_lo, across_hi, along_lo, along_hi) = match line.orientation {
                Orientation::Horizontal => (b.y1, b.y2, b.x1, b.x2),
                Orientation::Vertical => (b.x1, b.x2, b.y1, b.y2),
            };
            (across_lo < lo && hi < across_hi).then_some((along_lo, along_hi))
        })
        .collect();

    spans.sort_unstable();
    let mut merged: Vec<(u32, u32)> = Vec::new();
    for (s, e) in spans {
        match merged.last_mut() {
            Some(last) if s <= last.1 => last.1 = last.1.max(e),
            _ => merged.push((s, e)),
        }
    }
    merged
}
