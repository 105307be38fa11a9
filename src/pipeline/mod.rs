//! Pipeline stages for PDF-to-HTML conversion.
//!
//! Each submodule implements one step. External services sit behind traits
//! ([`render::Rasterizer`], [`publish::ObjectStore`], [`ocr::OcrService`],
//! [`llm::TextGenerator`]) so [`crate::convert`] can take injected clients
//! and tests can substitute fakes.
//!
//! ## Data Flow
//!
//! ```text
//! source ──▶ render ──▶ publish ──┐
//!   │                             ├──▶ join ──▶ synthesize/llm ──▶ (enrich | segment) ──▶ cleanup
//!   └──────▶ ocr ─────────────────┘
//! ```
//!
//! 1. [`source`]     acquire the PDF bytes and the temporary file copy
//! 2. [`render`]     rasterise pages (ghostscript per page, or pdfium)
//! 3. [`publish`]    upload page images, recover per-page URLs
//! 4. [`ocr`]        per-page markdown from the OCR service
//! 5. [`join`]       pair markdown and images by page number
//! 6. [`synthesize`] build the generation requests; [`llm`] streams them
//!
//! [`container`] and [`text`] are the single-step converters behind the
//! `pdf2htmlex` and `text` methods.

pub mod container;
pub mod encode;
pub mod join;
pub mod llm;
pub mod ocr;
pub mod publish;
pub mod render;
pub mod source;
pub mod synthesize;
pub mod text;
pub mod tool;
