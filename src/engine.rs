//! Seamless edit engine
//!
//! Ties the pipeline together: extract text pairs through the provider
//! fallback chain, resolve each pair to a precise region, model the chart
//! grid, build the edit mask, reconstruct the background, profile each
//! region's typography, and composite the replacements with matching
//! artifacts. Failures below the whole-call level degrade to per-extraction
//! statuses; the engine itself only errors on codec-level problems.

use std::time::Instant;

use image::RgbImage;
use tracing::{info, warn};

use crate::compositor::{composite_group, merge_overlapping, FontStore, RegionRender};
use crate::config::EngineConfig;
use crate::error::EditError;
use crate::grid::build_grid_model;
use crate::inpaint::reconstruct_background;
use crate::mask::build_edit_mask;
use crate::provider::FallbackChain;
use crate::resolver::{resolve_regions, BoxDetector};
use crate::style::StyleProfiler;
use crate::types::{EditStatus, SourceImage};

/// Whole-call outcome category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    /// At least one replacement was composited.
    Edited,
    /// The winning provider returned no text pairs.
    NoTextFound,
    /// Every provider in the fallback chain failed.
    ProvidersExhausted,
    /// Extractions existed but none resolved to a precise region.
    NothingResolved,
    /// The edit mask could not be reconstructed; image returned unchanged.
    ReconstructionFailed,
}

/// Per-extraction outcome, in extraction order.
#[derive(Debug, Clone)]
pub struct EditOutcome {
    pub extraction_index: usize,
    pub original: String,
    pub translated: String,
    pub status: EditStatus,
}

/// Call-level observability counters.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    /// Provider that won the fallback chain, when one did.
    pub provider: Option<String>,
    /// Last error seen when the chain was exhausted.
    pub provider_error: Option<String>,
    pub extractions: usize,
    pub resolved: usize,
    pub grid_lines: usize,
    /// Estimated source compression quality.
    pub quality: f32,
    pub elapsed_ms: u64,
}

/// Result of one edit call. `image` always has the source dimensions; on any
/// non-`Edited` status it is the source buffer unchanged.
#[derive(Debug)]
pub struct EditResult {
    pub image: RgbImage,
    pub status: EngineStatus,
    pub outcomes: Vec<EditOutcome>,
    pub diagnostics: Diagnostics,
}

/// The end-to-end text replacement engine.
pub struct SeamlessEditEngine {
    chain: FallbackChain,
    detector: Box<dyn BoxDetector>,
    fonts: FontStore,
    config: EngineConfig,
}

impl SeamlessEditEngine {
    pub fn new(
        chain: FallbackChain,
        detector: Box<dyn BoxDetector>,
        fonts: FontStore,
        config: EngineConfig,
    ) -> Self {
        Self {
            chain,
            detector,
            fonts,
            config,
        }
    }

    /// Replace the extracted text on `source` with its translations.
    ///
    /// Identical inputs produce byte-identical outputs: every pipeline stage
    /// is deterministic and noise is seeded from the image content.
    pub async fn edit(&self, source: &SourceImage) -> Result<EditResult, EditError> {
        let started = Instant::now();
        let mut result = self.run(source).await?;
        result.diagnostics.elapsed_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }

    async fn run(&self, source: &SourceImage) -> Result<EditResult, EditError> {
        let mut diagnostics = Diagnostics {
            quality: source.quality(),
            ..Diagnostics::default()
        };

        let png = source.to_png_bytes()?;
        let chain_result = match self.chain.extract(&png).await {
            Ok(r) => r,
            Err(EditError::ProviderExhausted { last_error }) => {
                warn!(last_error = %last_error, "returning image unchanged");
                diagnostics.provider_error = Some(last_error);
                return Ok(EditResult {
                    image: source.pixels().clone(),
                    status: EngineStatus::ProvidersExhausted,
                    outcomes: Vec::new(),
                    diagnostics,
                });
            }
            Err(e) => return Err(e),
        };

        diagnostics.provider = Some(chain_result.provider);
        diagnostics.extractions = chain_result.extractions.len();
        let extractions = chain_result.extractions;

        if extractions.is_empty() {
            info!("no text found, returning image unchanged");
            return Ok(EditResult {
                image: source.pixels().clone(),
                status: EngineStatus::NoTextFound,
                outcomes: Vec::new(),
                diagnostics,
            });
        }

        let resolve = resolve_regions(
            source.pixels(),
            &extractions,
            self.detector.as_ref(),
            &self.config.resolver,
        );
        diagnostics.resolved = resolve.regions.len();

        let mut outcomes: Vec<EditOutcome> = Vec::with_capacity(extractions.len());
        for &index in &resolve.unresolved {
            outcomes.push(EditOutcome {
                extraction_index: index,
                original: extractions[index].original.clone(),
                translated: extractions[index].translated.clone(),
                status: EditStatus::Skipped,
            });
        }

        if resolve.regions.is_empty() {
            warn!(
                extractions = extractions.len(),
                "no extraction resolved to a region, returning image unchanged"
            );
            outcomes.sort_by_key(|o| o.extraction_index);
            return Ok(EditResult {
                image: source.pixels().clone(),
                status: EngineStatus::NothingResolved,
                outcomes,
                diagnostics,
            });
        }

        let grid = build_grid_model(source.pixels(), &self.config.grid);
        diagnostics.grid_lines = grid.lines.len();

        let region_boxes: Vec<_> = resolve.regions.iter().map(|r| r.bbox).collect();
        let mask = build_edit_mask(
            source.width(),
            source.height(),
            &region_boxes,
            &grid,
            &self.config.mask,
        );

        // Typography must be read off the source, before the text is erased.
        let profiler = StyleProfiler::new(source.pixels(), &self.config.style);
        let renders: Vec<RegionRender> = resolve
            .regions
            .iter()
            .map(|r| RegionRender {
                extraction_index: r.extraction_index,
                bbox: r.bbox,
                style: profiler.profile(&r.bbox),
                text: r.extraction.translated.clone(),
            })
            .collect();

        let mut output = source.pixels().clone();
        if let Err(e) = reconstruct_background(&mut output, &mask, &self.config.inpaint) {
            warn!(error = %e, "reconstruction failed, returning image unchanged");
            for r in &resolve.regions {
                outcomes.push(EditOutcome {
                    extraction_index: r.extraction_index,
                    original: r.extraction.original.clone(),
                    translated: r.extraction.translated.clone(),
                    status: EditStatus::Failed,
                });
            }
            outcomes.sort_by_key(|o| o.extraction_index);
            return Ok(EditResult {
                image: source.pixels().clone(),
                status: EngineStatus::ReconstructionFailed,
                outcomes,
                diagnostics,
            });
        }

        // mask.dilated is in region order, so group members index renders.
        for group in merge_overlapping(&mask.dilated) {
            for (extraction_index, status) in composite_group(
                &mut output,
                &mask,
                &group,
                &renders,
                &self.fonts,
                source.quality(),
                &self.config.composite,
            ) {
                let e = &extractions[extraction_index];
                outcomes.push(EditOutcome {
                    extraction_index,
                    original: e.original.clone(),
                    translated: e.translated.clone(),
                    status,
                });
            }
        }

        outcomes.sort_by_key(|o| o.extraction_index);
        info!(
            applied = outcomes
                .iter()
                .filter(|o| matches!(o.status, EditStatus::Applied | EditStatus::Truncated))
                .count(),
            skipped = resolve.unresolved.len(),
            grid_lines = diagnostics.grid_lines,
            "edit complete"
        );

        Ok(EditResult {
            image: output,
            status: EngineStatus::Edited,
            outcomes,
            diagnostics,
        })
    }
}
