//! Error types for the edgequake-pdf2html library.
//!
//! Every fatal failure is a [`Pdf2HtmlError`]. The variants are grouped by
//! the stage that raised them, and [`Pdf2HtmlError::kind`] collapses them to
//! the coarse [`ErrorKind`] the CLI reports before exiting with status 1.
//!
//! Partial-data anomalies are *not* errors: an upload missing its page index,
//! a markdown page with no matching image or a rasteriser that stops early are
//! filtered out and counted in [`crate::output::PipelineDiagnostics`] instead.

use crate::pipeline::llm::FinishReason;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdf2html library.
#[derive(Debug, Error)]
pub enum Pdf2HtmlError {
    // ── Retrieval errors ──────────────────────────────────────────────────
    /// The server answered, but not with a 2xx status.
    #[error("Failed to fetch PDF '{url}': HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    /// The request never produced a response (DNS, TLS, connection reset…).
    #[error("Failed to fetch PDF '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Local input does not exist.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Local input exists but could not be read.
    #[error("Failed to read input file '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── External tool errors ──────────────────────────────────────────────
    /// The binary or container runtime could not be started at all.
    #[error("{tool} is not available: {detail}")]
    ToolUnavailable { tool: String, detail: String },

    /// The tool ran and reported failure.
    #[error("{tool} failed: {detail}")]
    ToolFailed { tool: String, detail: String },

    /// The tool exceeded the configured process timeout.
    #[error("{tool} timed out after {secs}s")]
    ToolTimeout { tool: String, secs: u64 },

    // ── Object storage errors ─────────────────────────────────────────────
    /// Upload or delete call failed, or its response could not be parsed.
    #[error("Object storage request failed: {0}")]
    Upload(String),

    // ── OCR errors ────────────────────────────────────────────────────────
    /// OCR call failed or returned an unreadable body.
    #[error("OCR request failed: {0}")]
    Extraction(String),

    // ── Generation errors ─────────────────────────────────────────────────
    /// The text-generation request or its stream failed.
    #[error("Text generation via '{provider}' failed: {detail}")]
    Generation { provider: String, detail: String },

    /// The stream completed, but not with a normal stop.
    ///
    /// The partial output has already been written to every sink.
    #[error("{stage} stopped early (finish reason: {reason}); partial output kept")]
    UnexpectedFinish { stage: String, reason: FinishReason },

    // ── Configuration errors ──────────────────────────────────────────────
    /// Required credentials are absent from the environment.
    #[error("Missing credentials: set {}", vars.join(", "))]
    MissingCredentials { vars: Vec<String> },

    /// Builder or CLI validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write an output HTML file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error classification reported by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Retrieval,
    ExternalTool,
    Upload,
    Extraction,
    Generation,
    Configuration,
    Output,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Retrieval => "RetrievalError",
            ErrorKind::ExternalTool => "ExternalToolError",
            ErrorKind::Upload => "UploadError",
            ErrorKind::Extraction => "ExtractionError",
            ErrorKind::Generation => "GenerationError",
            ErrorKind::Configuration => "ConfigurationError",
            ErrorKind::Output => "OutputError",
            ErrorKind::Internal => "InternalError",
        };
        f.write_str(name)
    }
}

impl Pdf2HtmlError {
    /// The coarse kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Pdf2HtmlError::HttpStatus { .. }
            | Pdf2HtmlError::DownloadFailed { .. }
            | Pdf2HtmlError::FileNotFound { .. }
            | Pdf2HtmlError::ReadFailed { .. } => ErrorKind::Retrieval,
            Pdf2HtmlError::ToolUnavailable { .. }
            | Pdf2HtmlError::ToolFailed { .. }
            | Pdf2HtmlError::ToolTimeout { .. } => ErrorKind::ExternalTool,
            Pdf2HtmlError::Upload(_) => ErrorKind::Upload,
            Pdf2HtmlError::Extraction(_) => ErrorKind::Extraction,
            Pdf2HtmlError::Generation { .. } | Pdf2HtmlError::UnexpectedFinish { .. } => {
                ErrorKind::Generation
            }
            Pdf2HtmlError::MissingCredentials { .. } | Pdf2HtmlError::InvalidConfig(_) => {
                ErrorKind::Configuration
            }
            Pdf2HtmlError::OutputWriteFailed { .. } => ErrorKind::Output,
            Pdf2HtmlError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// HTTP status carried by a retrieval failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Pdf2HtmlError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn generation(provider: &str, detail: impl fmt::Display) -> Self {
        Pdf2HtmlError::Generation {
            provider: provider.to_string(),
            detail: detail.to_string(),
        }
    }
}
