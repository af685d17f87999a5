//! Grid line detection
//!
//! Detects the structural horizontal/vertical reference lines of a chart
//! image so later stages can keep them untouched. Works on a Sobel edge map:
//! rows and columns with a long enough contiguous edge run become candidates,
//! collinear candidates cluster into one line, and each line's color is
//! sampled from the source image.

use image::{imageops, Rgb, RgbImage};
use imageproc::gradients::sobel_gradients;
use tracing::debug;

use crate::config::GridConfig;

/// Line orientation, restricted to the chart axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Horizontal,
    Vertical,
}

/// One structural grid line.
#[derive(Debug, Clone, Copy)]
pub struct GridLine {
    pub orientation: Orientation,
    /// Row (horizontal) or column (vertical) of the line center.
    pub position: u32,
    pub thickness: u32,
    /// Color sampled along the line.
    pub color: Rgb<u8>,
}

/// All grid lines detected in one image, deduplicated by clustering.
#[derive(Debug, Clone, Default)]
pub struct GridModel {
    pub lines: Vec<GridLine>,
}

impl GridModel {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn horizontal(&self) -> impl Iterator<Item = &GridLine> {
        self.lines
            .iter()
            .filter(|l| l.orientation == Orientation::Horizontal)
    }

    pub fn vertical(&self) -> impl Iterator<Item = &GridLine> {
        self.lines
            .iter()
            .filter(|l| l.orientation == Orientation::Vertical)
    }
}

/// Detect structural grid lines. An image with no qualifying lines yields an
/// empty model; that is a normal outcome, not an error.
pub fn build_grid_model(image: &RgbImage, config: &GridConfig) -> GridModel {
    let (width, height) = image.dimensions();
    if width < 4 || height < 4 {
        return GridModel::default();
    }

    let gray = imageops::grayscale(image);
    let edges = sobel_gradients(&gray);

    // Long enough to exclude text strokes and chart-body shapes.
    let min_len = ((width.min(height) as f32 * config.min_line_fraction) as u32).max(8);

    let mut row_candidates = Vec::new();
    for y in 0..height {
        let run = longest_run((0..width).map(|x| edges.get_pixel(x, y).0[0]), config.edge_threshold);
        if run >= min_len {
            row_candidates.push(y);
        }
    }

    let mut col_candidates = Vec::new();
    for x in 0..width {
        let run = longest_run((0..height).map(|y| edges.get_pixel(x, y).0[0]), config.edge_threshold);
        if run >= min_len {
            col_candidates.push(x);
        }
    }

    let mut model = GridModel::default();
    for (position, thickness) in cluster(&row_candidates, config.cluster_tolerance) {
        let color = sample_line_color(image, Orientation::Horizontal, position, config.color_samples);
        model.lines.push(GridLine {
            orientation: Orientation::Horizontal,
            position,
            thickness,
            color,
        });
    }
    for (position, thickness) in cluster(&col_candidates, config.cluster_tolerance) {
        let color = sample_line_color(image, Orientation::Vertical, position, config.color_samples);
        model.lines.push(GridLine {
            orientation: Orientation::Vertical,
            position,
            thickness,
            color,
        });
    }

    debug!(
        horizontal = model.horizontal().count(),
        vertical = model.vertical().count(),
        "grid model built"
    );
    model
}

/// Longest contiguous run of values above the threshold.
fn longest_run(values: impl Iterator<Item = u16>, threshold: u16) -> u32 {
    let mut best = 0u32;
    let mut current = 0u32;
    for v in values {
        if v > threshold {
            current += 1;
            best = best.max(current);
        } else {
            current = 0;
        }
    }
    best
}

/// Group candidate positions within the tolerance into (center, thickness)
/// pairs. A 1px line shows edge energy one row above and below itself, so the
/// gradient span overstates thickness by two.
fn cluster(candidates: &[u32], tolerance: u32) -> Vec<(u32, u32)> {
    let mut clusters = Vec::new();
    let mut iter = candidates.iter().copied();
    let Some(mut start) = iter.next() else {
        return clusters;
    };
    let mut end = start;

    for p in iter {
        if p - end <= tolerance {
            end = p;
        } else {
            clusters.push(finish_cluster(start, end));
            start = p;
            end = p;
        }
    }
    clusters.push(finish_cluster(start, end));
    clusters
}

fn finish_cluster(start: u32, end: u32) -> (u32, u32) {
    let span = end - start + 1;
    ((start + end) / 2, span.saturating_sub(2).max(1))
}

/// Per-channel median over evenly spaced samples along the line.
fn sample_line_color(
    image: &RgbImage,
    orientation: Orientation,
    position: u32,
    samples: u32,
) -> Rgb<u8> {
    let (width, height) = image.dimensions();
    let extent = match orientation {
        Orientation::Horizontal => width,
        Orientation::Vertical => height,
    };
    let n = samples.clamp(1, extent);

    let mut channels: [Vec<u8>; 3] = [Vec::new(), Vec::new(), Vec::new()];
    for i in 0..n {
        let along = (i * extent + extent / 2) / n;
        let p = match orientation {
            Orientation::Horizontal => image.get_pixel(along.min(width - 1), position.min(height - 1)),
            Orientation::Vertical => image.get_pixel(position.min(width - 1), along.min(height - 1)),
        };
        for c in 0..3 {
            channels[c].push(p.0[c]);
        }
    }

    let mut color = [0u8; 3];
    for c in 0..3 {
        channels[c].sort_unstable();
        color[c] = channels[c][channels[c].len() / 2];
    }
    Rgb(color)
}
