//! Markdown extraction through an OCR service.
//!
//! The service numbers pages from 0; [`extract_markdown`] shifts them to the
//! 1-based numbering used by rasterised pages so the two can be joined.
//! Pages whose markdown is blank are omitted and reported, not raised.

use crate::error::Pdf2HtmlError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

const MISTRAL_BASE_URL: &str = "https://api.mistral.ai/v1";
pub const DEFAULT_OCR_MODEL: &str = "mistral-ocr-latest";

/// One page as returned by the OCR service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OcrPage {
    /// 0-based page number.
    pub index: usize,
    #[serde(default)]
    pub markdown: String,
}

/// Markdown for one page, keyed by 1-based page number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkdownUnit {
    pub index: usize,
    pub text: String,
}

/// Usable markdown units plus the pages that came back empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    pub units: Vec<MarkdownUnit>,
    /// 1-based numbers of pages with no markdown.
    pub empty_pages: Vec<usize>,
}

#[async_trait]
pub trait OcrService: Send + Sync {
    /// Process the document at `document_url` (http(s) or data URI).
    async fn process(&self, document_url: &str) -> Result<Vec<OcrPage>, Pdf2HtmlError>;
}

/// Run OCR and normalise the result into [`MarkdownUnit`]s.
pub async fn extract_markdown(
    ocr: &dyn OcrService,
    document_url: &str,
) -> Result<Extracted, Pdf2HtmlError> {
    let pages = ocr.process(document_url).await?;
    info!("OCR returned {} pages", pages.len());

    let mut extracted = Extracted::default();
    for page in pages {
        let index = page.index + 1;
        if page.markdown.trim().is_empty() {
            warn!("OCR produced no markdown for page {}", index);
            extracted.empty_pages.push(index);
        } else {
            debug!("Page {}: {} chars of markdown", index, page.markdown.len());
            extracted.units.push(MarkdownUnit {
                index,
                text: page.markdown,
            });
        }
    }
    Ok(extracted)
}

/// Client for Mistral's OCR endpoint.
pub struct MistralOcr {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    #[serde(default)]
    pages: Vec<OcrPage>,
}

impl MistralOcr {
    pub fn new(api_key: &str, timeout: Option<Duration>) -> Result<Self, Pdf2HtmlError> {
        let mut builder = reqwest::Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        let client = builder
            .build()
            .map_err(|e| Pdf2HtmlError::Extraction(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model: DEFAULT_OCR_MODEL.to_string(),
            base_url: MISTRAL_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl OcrService for MistralOcr {
    async fn process(&self, document_url: &str) -> Result<Vec<OcrPage>, Pdf2HtmlError> {
        let body = json!({
            "model": self.model,
            "document": { "type": "document_url", "document_url": document_url },
            "include_image_base64": false,
        });
        let response = self
            .client
            .post(format!("{}/ocr", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Pdf2HtmlError::Extraction(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Pdf2HtmlError::Extraction(format!("HTTP {status}: {text}")));
        }
        let parsed: OcrResponse = response
            .json()
            .await
            .map_err(|e| Pdf2HtmlError::Extraction(format!("malformed response: {e}")))?;
        Ok(parsed.pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<OcrPage>);

    #[async_trait]
    impl OcrService for Fixed {
        async fn process(&self, _url: &str) -> Result<Vec<OcrPage>, Pdf2HtmlError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn indices_shift_to_one_based_and_empty_pages_are_reported() {
        let ocr = Fixed(vec![
            OcrPage { index: 0, markdown: "# Title".into() },
            OcrPage { index: 1, markdown: "  \n".into() },
            OcrPage { index: 2, markdown: "body".into() },
        ]);
        let out = extract_markdown(&ocr, "https://example.com/a.pdf").await.unwrap();
        assert_eq!(out.units.iter().map(|u| u.index).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(out.empty_pages, vec![2]);
    }

    #[test]
    fn response_pages_parse_with_extra_fields() {
        let body = r#"{"pages":[{"index":0,"markdown":"hi","images":[],"dimensions":{"dpi":200,"height":10,"width":10}}],"model":"mistral-ocr-2505","usage_info":{"pages_processed":1}}"#;
        let parsed: OcrResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.pages, vec![OcrPage { index: 0, markdown: "hi".into() }]);
    }
}
