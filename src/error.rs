//! Error taxonomy for the editing pipeline.
//!
//! Every failure is scoped to the smallest failing unit: a single provider
//! attempt, a single unresolved extraction, or a single reconstruction pass.
//! None of these propagate uncaught out of the engine; they are folded into
//! per-extraction statuses in the final `EditResult`.

use std::time::Duration;

use thiserror::Error;

/// Failure of one provider attempt in the fallback chain.
///
/// Timeouts and request errors are treated identically by the chain: both
/// advance to the next attempt or provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider timed out after {0:?}")]
    Timeout(Duration),
    #[error("provider request failed: {0}")]
    Failed(String),
}

/// Errors raised inside the editing pipeline.
#[derive(Debug, Error)]
pub enum EditError {
    /// Every provider in the fallback chain failed. Non-fatal at the engine
    /// level: the original image is returned unchanged.
    #[error("all extraction providers failed: {last_error}")]
    ProviderExhausted { last_error: String },

    /// An extraction could not be matched to a precise bounding box. The
    /// single item is skipped; siblings proceed.
    #[error("extraction could not be resolved to a precise bounding box")]
    RegionUnresolved,

    /// Inpainting failed for the edit mask. Affected regions are left
    /// unedited and reported as failed.
    #[error("background reconstruction failed: {0}")]
    ReconstructionFailed(String),

    /// Translated text is too wide even at the minimum font size. Resolved
    /// by truncation with an explicit ellipsis, never a crash.
    #[error("translated text exceeds region width at minimum font size")]
    TextOverflow,

    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),
}
