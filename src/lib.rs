//! chart-retouch - Seamless text replacement for chart screenshots
//!
//! Replaces text on lossily-compressed chart images (trading screenshots,
//! dashboards) without leaving visible editing traces. Text pairs come from a
//! fallback chain of extraction providers; regions are resolved against a
//! local detector; the chart grid is modeled and protected; the background is
//! reconstructed under the old text; and the replacement is rendered with
//! matched typography plus simulated compression artifacts.
//!
//! The whole pipeline is deterministic: identical inputs produce
//! byte-identical outputs.

pub mod compositor;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod grid;
pub mod inpaint;
pub mod mask;
pub mod provider;
pub mod resolver;
pub mod style;
pub mod types;

pub use compositor::FontStore;
pub use config::{load_config, save_config, EngineConfig};
pub use detector::LumaRegionDetector;
pub use engine::{Diagnostics, EditOutcome, EditResult, EngineStatus, SeamlessEditEngine};
pub use error::{EditError, ProviderError};
pub use provider::{FallbackChain, StaticProvider, TextProvider};
pub use resolver::BoxDetector;
pub use types::{BBox, EditStatus, SourceImage, TextExtraction};
