//! Result types returned by the conversion entry points.

use crate::pipeline::join::JoinDiagnostics;
use crate::pipeline::llm::FinishReason;
use crate::pipeline::render::RasterTermination;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One streamed generation pass and the file it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    pub path: PathBuf,
    /// `provider/model` that generated the file.
    pub model: String,
    pub finish_reason: FinishReason,
    /// Character count of the written HTML.
    pub chars: usize,
    pub fragments: usize,
    pub duration_ms: u64,
}

/// Outcome of deleting published page images.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub attempted: usize,
    pub deleted: usize,
    /// Set when the delete call failed; the run continues regardless.
    pub error: Option<String>,
}

/// Everything the pipeline filtered out or stopped on, in one place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    pub raster_termination: Option<RasterTermination>,
    /// Upload response entries without a usable page index or URL.
    pub dropped_uploads: usize,
    /// Pages the OCR service returned with empty markdown.
    pub empty_ocr_pages: Vec<usize>,
    pub join: JoinDiagnostics,
    pub cleanup: Option<CleanupReport>,
}

/// Counts and timings for a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub pages_rasterized: usize,
    pub images_published: usize,
    pub markdown_units: usize,
    pub pages_synthesized: usize,
    pub acquire_ms: u64,
    pub rasterize_ms: u64,
    pub publish_ms: u64,
    pub extract_ms: u64,
    pub total_ms: u64,
}

/// Report of one multi-stage pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub source: String,
    pub synthesis: StageOutput,
    /// Enrichment or segmentation pass, when configured.
    pub secondary: Option<StageOutput>,
    pub stats: PipelineStats,
    pub diagnostics: PipelineDiagnostics,
}

impl PipelineOutput {
    /// Files written by the run, in order.
    pub fn files(&self) -> Vec<&StageOutput> {
        std::iter::once(&self.synthesis)
            .chain(self.secondary.as_ref())
            .collect()
    }
}

/// Report of a single-file conversion (text, container, enrich, segment).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionOutput {
    pub path: PathBuf,
    /// `text`, `pdf2htmlex`, `enrich` or `segment`.
    pub method: String,
    pub chars: usize,
    /// Pages in the document, when the method knows it.
    pub pages: Option<usize>,
    /// Set when a generation pass produced the file.
    pub finish_reason: Option<FinishReason>,
    /// True when the container converter failed and text extraction was used.
    pub fell_back: bool,
}
