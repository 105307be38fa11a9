//! Page rasterisation: turn the PDF into one PNG per page.
//!
//! Two interchangeable strategies behind [`Rasterizer`]:
//!
//! - [`GhostscriptRasterizer`] runs `gs` once per page. It first asks
//!   ghostscript for the page count; only when that query fails does it fall
//!   back to probing page after page until the tool stops producing output.
//!   In that mode stderr is inspected so a real tool failure is recorded as
//!   [`RasterTermination::ToolFailed`] rather than mistaken for the end of
//!   the document. Either way the run is *not* an error: the pages rendered
//!   so far are returned.
//! - [`PdfiumRasterizer`] renders in-process from the byte buffer at a scale
//!   factor. pdfium is blocking, so it runs inside `spawn_blocking`.
//!
//! Both stop at a hard page ceiling (100 by default).

use crate::error::Pdf2HtmlError;
use crate::pipeline::encode;
use crate::pipeline::source::SourceDocument;
use crate::pipeline::tool;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use pdfium_render::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One rasterised page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// 1-based page number.
    pub index: usize,
    /// PNG bytes.
    pub png: Vec<u8>,
}

/// Why rasterisation stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RasterTermination {
    /// Every page of a known page count was rendered.
    Complete,
    /// Probing reached a page past the end.
    EndOfDocument,
    /// The tool failed on `page`; later pages are absent.
    ToolFailed { page: usize, detail: String },
    /// The page ceiling was reached before the document ended.
    Ceiling { limit: usize },
}

/// Pages in order `1..=n` plus the reason rendering stopped.
#[derive(Debug, Clone)]
pub struct RasterOutput {
    pub pages: Vec<Page>,
    pub termination: RasterTermination,
}

#[async_trait]
pub trait Rasterizer: Send + Sync {
    fn name(&self) -> &str;

    async fn rasterize(&self, doc: &SourceDocument) -> Result<RasterOutput, Pdf2HtmlError>;
}

// ── Ghostscript ──────────────────────────────────────────────────────────

/// stderr phrases ghostscript prints when asked for a page past the end.
static END_OF_DOCUMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(first\s*page\s+is\s+greater|greater\s+than\s+the\s+number\s+of\s+pages|no\s+pages\s+will\s+be\s+processed)")
        .expect("static regex")
});

/// Classified result of one per-page invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PageAttempt {
    Rendered,
    PastEnd,
    Failed(String),
}

pub(crate) fn classify_attempt(success: bool, produced_file: bool, stderr: &str) -> PageAttempt {
    if success && produced_file {
        PageAttempt::Rendered
    } else if END_OF_DOCUMENT.is_match(stderr) || (success && !produced_file) {
        PageAttempt::PastEnd
    } else {
        let detail = stderr
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
            .unwrap_or("exited without output")
            .to_string();
        PageAttempt::Failed(detail)
    }
}

/// Rasterises through an external ghostscript process.
#[derive(Debug, Clone)]
pub struct GhostscriptRasterizer {
    program: PathBuf,
    leading_args: Vec<String>,
    dpi: u32,
    max_pages: usize,
    timeout: Option<Duration>,
    screenshot_dir: PathBuf,
}

impl GhostscriptRasterizer {
    pub fn new(work_dir: &Path, dpi: u32, max_pages: usize) -> Self {
        Self {
            program: PathBuf::from("gs"),
            leading_args: Vec::new(),
            dpi,
            max_pages,
            timeout: None,
            screenshot_dir: work_dir.join("screenshots"),
        }
    }

    /// Use a different executable, e.g. `gswin64c` or a wrapper script.
    pub fn with_program(mut self, program: impl Into<PathBuf>, leading_args: Vec<String>) -> Self {
        self.program = program.into();
        self.leading_args = leading_args;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn page_args(&self, page: usize, pdf: &Path, out: &Path) -> Vec<String> {
        vec![
            "-dNOPAUSE".into(),
            "-dBATCH".into(),
            "-dSAFER".into(),
            "-sDEVICE=png16m".into(),
            format!("-r{}", self.dpi),
            "-dTextAlphaBits=4".into(),
            "-dGraphicsAlphaBits=4".into(),
            format!("-dFirstPage={page}"),
            format!("-dLastPage={page}"),
            format!("-sOutputFile={}", out.display()),
            pdf.display().to_string(),
        ]
    }

    /// The path travels as the `File` string parameter, never inside the
    /// PostScript program, and SAFER only lets the query read that file.
    fn count_args(pdf: &Path) -> Vec<String> {
        let path = pdf.display().to_string().replace('\\', "/");
        vec![
            "-q".into(),
            "-dNODISPLAY".into(),
            "-dSAFER".into(),
            "-dNOPAUSE".into(),
            "-dBATCH".into(),
            format!("--permit-file-read={path}"),
            format!("-sFile={path}"),
            "-c".into(),
            "File (r) file runpdfbegin pdfpagecount = quit".into(),
        ]
    }

    async fn run(&self, args: Vec<String>) -> Result<Output, Pdf2HtmlError> {
        let mut full = self.leading_args.clone();
        full.extend(args);
        tool::run_tool(self.program.as_os_str(), &full, self.timeout).await
    }

    /// Ask ghostscript for the page count. `None` when the query fails.
    pub async fn page_count(&self, pdf: &Path) -> Result<Option<usize>, Pdf2HtmlError> {
        let output = self.run(Self::count_args(pdf)).await?;
        if !output.status.success() {
            debug!("Page-count query failed; probing pages instead");
            return Ok(None);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .rev()
            .find_map(|l| l.trim().parse::<usize>().ok()))
    }

    async fn render_page(&self, page: usize, pdf: &Path) -> Result<(PageAttempt, Option<Vec<u8>>), Pdf2HtmlError> {
        let out = self.screenshot_dir.join(format!("page-{page}.png"));
        let _ = tokio::fs::remove_file(&out).await;

        let output = self.run(self.page_args(page, pdf, &out)).await?;
        let bytes = tokio::fs::read(&out).await.ok().filter(|b| !b.is_empty());
        let _ = tokio::fs::remove_file(&out).await;

        let stderr = String::from_utf8_lossy(&output.stderr);
        let attempt = classify_attempt(output.status.success(), bytes.is_some(), &stderr);
        Ok((attempt, bytes))
    }
}

#[async_trait]
impl Rasterizer for GhostscriptRasterizer {
    fn name(&self) -> &str {
        "ghostscript"
    }

    async fn rasterize(&self, doc: &SourceDocument) -> Result<RasterOutput, Pdf2HtmlError> {
        let pdf = doc.temp.path();
        tokio::fs::create_dir_all(&self.screenshot_dir)
            .await
            .map_err(|e| Pdf2HtmlError::OutputWriteFailed {
                path: self.screenshot_dir.clone(),
                source: e,
            })?;

        let known = self.page_count(pdf).await?;
        let last = match known {
            Some(n) => {
                info!("Ghostscript reports {} pages", n);
                n.min(self.max_pages)
            }
            None => self.max_pages,
        };

        let mut pages = Vec::new();
        let mut termination = match known {
            Some(n) if n > self.max_pages => RasterTermination::Ceiling { limit: self.max_pages },
            Some(_) => RasterTermination::Complete,
            None => RasterTermination::Ceiling { limit: self.max_pages },
        };

        for index in 1..=last {
            let (attempt, bytes) = self.render_page(index, pdf).await?;
            match (attempt, bytes) {
                (PageAttempt::Rendered, Some(png)) => {
                    debug!("Rendered page {} ({} bytes)", index, png.len());
                    pages.push(Page { index, png });
                }
                (PageAttempt::PastEnd, _) if known.is_none() => {
                    termination = RasterTermination::EndOfDocument;
                    break;
                }
                (PageAttempt::PastEnd, _) | (PageAttempt::Rendered, None) => {
                    termination = RasterTermination::ToolFailed {
                        page: index,
                        detail: "no output produced".into(),
                    };
                    break;
                }
                (PageAttempt::Failed(detail), _) => {
                    termination = RasterTermination::ToolFailed { page: index, detail };
                    break;
                }
            }
        }

        if let RasterTermination::ToolFailed { page, detail } = &termination {
            warn!("Ghostscript stopped at page {}: {} (keeping {} pages)", page, detail, pages.len());
        }
        info!("Rasterised {} pages via ghostscript", pages.len());
        Ok(RasterOutput { pages, termination })
    }
}

// ── pdfium ───────────────────────────────────────────────────────────────

/// Bind pdfium: `PDFIUM_LIB_PATH`, then the working directory, then the system.
pub fn bind_pdfium() -> Result<Pdfium, Pdf2HtmlError> {
    let dir = std::env::var("PDFIUM_LIB_PATH").unwrap_or_else(|_| "./".to_string());
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir))
        .or_else(|_| Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./")))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| Pdf2HtmlError::ToolUnavailable {
            tool: "pdfium".into(),
            detail: format!("{e}; set PDFIUM_LIB_PATH to the directory holding the library"),
        })?;
    Ok(Pdfium::new(bindings))
}

/// Rasterises in-process with pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    scale: f32,
    max_pages: usize,
}

impl PdfiumRasterizer {
    pub fn new(scale: f32, max_pages: usize) -> Self {
        Self { scale, max_pages }
    }
}

fn render_blocking(bytes: &[u8], scale: f32, max_pages: usize) -> Result<RasterOutput, Pdf2HtmlError> {
    let pdfium = bind_pdfium()?;
    let failed = |detail: String| Pdf2HtmlError::ToolFailed {
        tool: "pdfium".into(),
        detail,
    };
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| failed(format!("cannot open PDF: {e:?}")))?;

    let total = document.pages().len() as usize;
    info!("PDF loaded: {} pages", total);
    let render_config = PdfRenderConfig::new().scale_page_by_factor(scale);

    let mut pages = Vec::with_capacity(total.min(max_pages));
    for (i, page) in document.pages().iter().enumerate().take(max_pages) {
        let index = i + 1;
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| failed(format!("page {index}: {e:?}")))?;
        let image = bitmap.as_image();
        let png = encode::png_bytes(&image).map_err(|e| failed(format!("page {index}: {e}")))?;
        debug!("Rendered page {} → {}x{} px", index, image.width(), image.height());
        pages.push(Page { index, png });
    }

    let termination = if total > max_pages {
        RasterTermination::Ceiling { limit: max_pages }
    } else {
        RasterTermination::Complete
    };
    Ok(RasterOutput { pages, termination })
}

#[async_trait]
impl Rasterizer for PdfiumRasterizer {
    fn name(&self) -> &str {
        "pdfium"
    }

    async fn rasterize(&self, doc: &SourceDocument) -> Result<RasterOutput, Pdf2HtmlError> {
        let bytes = doc.bytes.clone();
        let scale = self.scale;
        let max_pages = self.max_pages;
        tokio::task::spawn_blocking(move || render_blocking(&bytes, scale, max_pages))
            .await
            .map_err(|e| Pdf2HtmlError::Internal(format!("Render task panicked: {}", e)))?
    }
}
