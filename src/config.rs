//! Engine configuration
//!
//! Tunable constants for every pipeline stage, stored in TOML format. The
//! defaults are empirical values calibrated on low-resolution chart
//! screenshots; treat them as a starting point, not ground truth.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level engine settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub provider: ProviderConfig,
    pub resolver: ResolverConfig,
    pub grid: GridConfig,
    pub mask: MaskConfig,
    pub inpaint: InpaintConfig,
    pub style: StyleConfig,
    pub composite: CompositeConfig,
}

/// Fallback-chain settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Per-attempt timeout in milliseconds.
    pub attempt_timeout_ms: u64,
    /// Retries per provider before advancing to the next one.
    pub max_retries: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: 30_000,
            max_retries: 1,
        }
    }
}

/// Region resolution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Extractions at or above this confidence keep their own bbox.
    pub trusted_confidence: f32,
    /// Minimum IoU between a detector box and the approximate region.
    pub iou_threshold: f32,
    /// Margin added around an approximate bbox when scoping the detector.
    pub hint_margin: u32,
    /// Minimum resolved region area in pixels.
    pub min_region_area: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            trusted_confidence: 0.85,
            iou_threshold: 0.3,
            hint_margin: 20,
            min_region_area: 64,
        }
    }
}

/// Grid-line detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Sobel gradient magnitude above which a pixel counts as an edge.
    pub edge_threshold: u16,
    /// Minimum line length as a fraction of the shorter image dimension.
    /// Large enough to exclude text strokes and chart-body shapes.
    pub min_line_fraction: f32,
    /// Collinear candidates within this many pixels merge into one line.
    pub cluster_tolerance: u32,
    /// Number of evenly spaced samples used for the line color.
    pub color_samples: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            edge_threshold: 80,
            min_line_fraction: 0.25,
            cluster_tolerance: 2,
            color_samples: 32,
        }
    }
}

/// Edit-mask settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskConfig {
    /// Pixels added around each text box to absorb compression halo.
    pub dilation_margin: u32,
    /// Extra pixels protected on each side of a grid line.
    pub grid_protection_margin: u32,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            dilation_margin: 5,
            grid_protection_margin: 2,
        }
    }
}

/// Background reconstruction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InpaintConfig {
    /// Neighborhood radius gradients are drawn from.
    pub radius: u32,
}

impl Default for InpaintConfig {
    fn default() -> Self {
        Self { radius: 3 }
    }
}

/// Style profiling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleConfig {
    /// Interior margin excluded near the box edge to avoid background bleed.
    pub edge_margin: u32,
    /// Pixels within this luminance distance of the modal background are
    /// discarded before computing the dominant color.
    pub background_exclusion: u8,
    /// Estimated font size = region height x this ratio.
    pub font_height_ratio: f32,
    /// Font size floor in pixels.
    pub min_font_px: f32,
    /// Normalized edge-pixel density above which a region counts as bold.
    pub bold_edge_density: f32,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            edge_margin: 2,
            background_exclusion: 30,
            font_height_ratio: 0.8,
            min_font_px: 8.0,
            bold_edge_density: 0.30,
        }
    }
}

/// Text compositing and artifact simulation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeConfig {
    /// Hard font size floor when shrinking to fit; below this, truncate.
    pub min_font_px: f32,
    /// Gaussian blur sigma applied to rendered glyphs.
    pub blur_sigma: f32,
    /// Luminance noise opacity relative to local background deviation.
    pub noise_opacity: f32,
    /// Round-trip composited patches through a lossy re-encode at the
    /// image's estimated quality.
    pub simulate_compression: bool,
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            min_font_px: 4.0,
            blur_sigma: 0.5,
            noise_opacity: 0.08,
            simulate_compression: true,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: EngineConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &EngineConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
