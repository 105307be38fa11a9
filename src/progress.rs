//! Progress-callback trait for pipeline stage events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to follow a
//! run stage by stage, and fragment by fragment while a generation pass
//! streams.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf2html::{PipelineConfig, PipelineProgressCallback, PipelineStage};
//! use std::sync::Arc;
//!
//! struct Log;
//!
//! impl PipelineProgressCallback for Log {
//!     fn on_stage_complete(&self, stage: PipelineStage, elapsed_ms: u64) {
//!         eprintln!("{stage} took {elapsed_ms} ms");
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(Log) as Arc<dyn PipelineProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Steps of a pipeline run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Acquire,
    Rasterize,
    Publish,
    Extract,
    Synthesize,
    Enrich,
    Segment,
    Cleanup,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Acquire => "acquire",
            PipelineStage::Rasterize => "rasterize",
            PipelineStage::Publish => "publish",
            PipelineStage::Extract => "extract",
            PipelineStage::Synthesize => "synthesize",
            PipelineStage::Enrich => "enrich",
            PipelineStage::Segment => "segment",
            PipelineStage::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// Called by the pipeline as it moves through its stages.
///
/// With fan-out enabled, rasterize/publish and extract events interleave
/// from concurrent branches. All methods default to no-ops.
pub trait PipelineProgressCallback: Send + Sync {
    fn on_stage_start(&self, stage: PipelineStage) {
        let _ = stage;
    }

    fn on_stage_complete(&self, stage: PipelineStage, elapsed_ms: u64) {
        let _ = (stage, elapsed_ms);
    }

    /// Called once the page count is known.
    fn on_pages_rasterized(&self, pages: usize) {
        let _ = pages;
    }

    /// Called for every streamed fragment; `total_chars` is the running output size.
    fn on_fragment(&self, stage: PipelineStage, total_chars: usize) {
        let _ = (stage, total_chars);
    }

    fn on_stage_error(&self, stage: PipelineStage, error: &str) {
        let _ = (stage, error);
    }
}

pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
