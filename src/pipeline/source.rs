//! Source acquisition: resolve a locator to the PDF's raw bytes.
//!
//! The bytes are also written to `<work_dir>/temp_input.pdf` for the tools
//! that only take a file (ghostscript, the pdf2htmlEX container). The copy is
//! written only after the fetch succeeded and is removed when the returned
//! [`TempPdf`] is dropped.
//!
//! The temporary name is fixed: two runs sharing a work directory will
//! overwrite each other's input.

use crate::error::Pdf2HtmlError;
use crate::pipeline::encode;
use futures::StreamExt;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// File name of the temporary PDF copy inside the work directory.
pub const TEMP_PDF_NAME: &str = "temp_input.pdf";

/// Where a document comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    Url(String),
    Local(PathBuf),
}

impl SourceLocator {
    /// Classify a user-supplied string.
    ///
    /// `http://` and `https://` are URLs; `file://` is stripped; anything
    /// else is a filesystem path, absolute or relative.
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if input.starts_with("http://") || input.starts_with("https://") {
            SourceLocator::Url(input.to_string())
        } else if let Some(path) = input.strip_prefix("file://") {
            SourceLocator::Local(PathBuf::from(path))
        } else {
            SourceLocator::Local(PathBuf::from(input))
        }
    }

    pub fn is_url(&self) -> bool {
        matches!(self, SourceLocator::Url(_))
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocator::Url(url) => f.write_str(url),
            SourceLocator::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// The temporary on-disk copy of the source PDF. Removed on drop.
#[derive(Debug)]
pub struct TempPdf {
    path: PathBuf,
}

impl TempPdf {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempPdf {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {}: {}", self.path.display(), e),
        }
    }
}

/// An acquired document: immutable bytes plus their temporary file copy.
#[derive(Debug)]
pub struct SourceDocument {
    pub locator: SourceLocator,
    pub bytes: Vec<u8>,
    pub temp: TempPdf,
}

impl SourceDocument {
    /// Locator handed to the OCR service: the URL itself, or a data URI
    /// carrying the bytes for local files.
    pub fn ocr_document_url(&self) -> String {
        match &self.locator {
            SourceLocator::Url(url) => url.clone(),
            SourceLocator::Local(_) => encode::data_uri("application/pdf", &self.bytes),
        }
    }
}

/// Fetch or read the document, then persist it to the work directory.
pub async fn acquire(
    locator: &SourceLocator,
    work_dir: &Path,
    timeout: Option<Duration>,
) -> Result<SourceDocument, Pdf2HtmlError> {
    let bytes = match locator {
        SourceLocator::Url(url) => download(url, timeout).await?,
        SourceLocator::Local(path) => read_local(path).await?,
    };
    info!("Acquired {} bytes from {}", bytes.len(), locator);

    tokio::fs::create_dir_all(work_dir)
        .await
        .map_err(|e| Pdf2HtmlError::OutputWriteFailed {
            path: work_dir.to_path_buf(),
            source: e,
        })?;
    let path = work_dir.join(TEMP_PDF_NAME);
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| Pdf2HtmlError::OutputWriteFailed {
            path: path.clone(),
            source: e,
        })?;
    debug!("Wrote temporary copy to {}", path.display());

    Ok(SourceDocument {
        locator: locator.clone(),
        bytes,
        temp: TempPdf { path },
    })
}

async fn read_local(path: &Path) -> Result<Vec<u8>, Pdf2HtmlError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Pdf2HtmlError::FileNotFound {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(Pdf2HtmlError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

async fn download(url: &str, timeout: Option<Duration>) -> Result<Vec<u8>, Pdf2HtmlError> {
    info!("Downloading PDF from: {}", url);
    let failed = |reason: String| Pdf2HtmlError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let mut builder = reqwest::Client::builder();
    if let Some(t) = timeout {
        builder = builder.timeout(t);
    }
    let client = builder.build().map_err(|e| failed(e.to_string()))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| failed(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Pdf2HtmlError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let mut data = Vec::with_capacity(response.content_length().unwrap_or(0) as usize);
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| failed(e.to_string()))?;
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_locators() {
        assert_eq!(
            SourceLocator::parse("https://example.com/doc.pdf"),
            SourceLocator::Url("https://example.com/doc.pdf".into())
        );
        assert_eq!(
            SourceLocator::parse("file:///tmp/doc.pdf"),
            SourceLocator::Local(PathBuf::from("/tmp/doc.pdf"))
        );
        assert_eq!(
            SourceLocator::parse("docs/a.pdf"),
            SourceLocator::Local(PathBuf::from("docs/a.pdf"))
        );
        assert!(!SourceLocator::parse("C:\\docs\\a.pdf").is_url());
    }

    #[tokio::test]
    async fn local_file_is_copied_then_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pdf");
        std::fs::write(&input, b"%PDF-1.7 body").unwrap();
        let work = dir.path().join("work");

        let doc = acquire(&SourceLocator::Local(input), &work, None).await.unwrap();
        assert_eq!(doc.bytes, b"%PDF-1.7 body");
        let temp = doc.temp.path().to_path_buf();
        assert_eq!(std::fs::read(&temp).unwrap(), b"%PDF-1.7 body");
        assert!(doc.ocr_document_url().starts_with("data:application/pdf;base64,"));

        drop(doc);
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn missing_file_is_retrieval_error_without_temp_copy() {
        let dir = tempfile::tempdir().unwrap();
        let err = acquire(
            &SourceLocator::Local(dir.path().join("nope.pdf")),
            dir.path(),
            None,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Retrieval);
        assert!(!dir.path().join(TEMP_PDF_NAME).exists());
    }
}
