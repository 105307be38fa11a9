//! # edgequake-pdf2html
//!
//! Turn PDF documents into styled, semantically segmented HTML.
//!
//! ## Why this crate?
//!
//! Text-layer extractors lose layout, and OCR alone loses the visual design.
//! This crate combines both: every page is rasterised to PNG, an OCR service
//! returns per-page Markdown, and a vision-capable LLM reads the two side by
//! side to assemble one HTML document. A second pass then enriches its
//! visual design or splits it into logical sections. Both passes stream to
//! disk as they generate.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF (URL or path)
//!  │
//!  ├─ 1. Acquire     download or read; temporary copy in the work directory
//!  ├─ 2. Rasterize   ghostscript per page (or pdfium) → PNG
//!  ├─ 3. Publish     upload PNGs to object storage → public URLs
//!  ├─ 4. Extract     OCR → per-page Markdown
//!  ├─ 5. Synthesize  Markdown + page images → output-<ms>.html (streamed)
//!  ├─ 6. Cleanup     delete the published images (best effort)
//!  └─ 7. Segment     output HTML → segment-<ms>.html (streamed)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2html::{convert, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Keys come from MISTRAL_API_KEY, UPLOADTHING_SECRET, OPENAI_API_KEY, ANTHROPIC_API_KEY
//!     let config = PipelineConfig::default();
//!     let output = convert("https://arxiv.org/pdf/1706.03762", &config).await?;
//!     for file in output.files() {
//!         eprintln!("{}: {} chars", file.path.display(), file.chars);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2html` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-pdf2html = { version = "0.1", default-features = false }
//! ```
//!
//! ## External Requirements
//!
//! | Need | When |
//! |------|------|
//! | `gs` on `PATH` | ghostscript rasterisation (default) |
//! | libpdfium | `text` method and pdfium rasterisation |
//! | `docker` | `pdf2htmlex` method |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ConverterOptions, Credentials, ImageDelivery, PipelineConfig, PipelineConfigBuilder,
    RasterStrategy, SecondaryMode, Service,
};
pub use convert::{
    convert, convert_text, convert_with_container, enrich_html, run_pipeline, segment_html,
    Method, Services,
};
pub use error::{ErrorKind, Pdf2HtmlError};
pub use output::{
    CleanupReport, ConversionOutput, PipelineDiagnostics, PipelineOutput, PipelineStats,
    StageOutput,
};
pub use pipeline::llm::{FinishReason, ImageRef, ModelSpec, TextGenerator};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, PipelineStage, ProgressCallback};
