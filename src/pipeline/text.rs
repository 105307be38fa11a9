//! Fast text extraction: the PDF's text layer as minimal HTML.
//!
//! No rendering, no network. Each page becomes a
//! `<section class="page" data-page="N">` holding one `<p>` per paragraph,
//! paragraphs being separated by blank lines in pdfium's text output.

use crate::error::Pdf2HtmlError;
use crate::pipeline::render::bind_pdfium;
use tracing::{debug, info};

/// Extract the text of every page, in page order.
pub async fn extract_page_texts(bytes: Vec<u8>) -> Result<Vec<String>, Pdf2HtmlError> {
    tokio::task::spawn_blocking(move || extract_blocking(&bytes))
        .await
        .map_err(|e| Pdf2HtmlError::Internal(format!("Text extraction task panicked: {e}")))?
}

fn extract_blocking(bytes: &[u8]) -> Result<Vec<String>, Pdf2HtmlError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| Pdf2HtmlError::ToolFailed {
            tool: "pdfium".into(),
            detail: format!("cannot open PDF: {e:?}"),
        })?;

    let mut texts = Vec::new();
    for (i, page) in document.pages().iter().enumerate() {
        // A page without a text layer is kept as an empty section.
        let text = page.text().map(|t| t.all()).unwrap_or_default();
        debug!("Page {}: {} chars of text", i + 1, text.len());
        texts.push(text);
    }
    info!("Extracted text from {} pages", texts.len());
    Ok(texts)
}

/// Escape text for HTML element content and attribute values.
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn paragraphs(text: &str) -> Vec<String> {
    let normalised = text.replace("\r\n", "\n").replace('\r', "\n");
    normalised
        .split("\n\n")
        .map(|p| {
            p.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|p| !p.is_empty())
        .collect()
}

/// Render page texts as a standalone HTML document.
pub fn render_text_html(title: &str, pages: &[String]) -> String {
    let mut html = String::from("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str(&format!("<title>{}</title>\n", html_escape(title)));
    html.push_str(
        "<style>body{max-width:48rem;margin:2rem auto;font-family:Georgia,serif;line-height:1.5}\
         section.page{border-bottom:1px solid #ddd;padding-bottom:1rem;margin-bottom:1rem}</style>\n",
    );
    html.push_str("</head>\n<body>\n");
    for (i, text) in pages.iter().enumerate() {
        html.push_str(&format!("<section class=\"page\" data-page=\"{}\">\n", i + 1));
        for p in paragraphs(text) {
            html.push_str("<p>");
            html.push_str(&html_escape(&p));
            html.push_str("</p>\n");
        }
        html.push_str("</section>\n");
    }
    html.push_str("</body>\n</html>\n");
    html
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(html_escape(r#"a<b & "c"'"#), "a&lt;b &amp; &quot;c&quot;&#39;");
    }

    #[test]
    fn pages_become_sections_of_paragraphs() {
        let pages = vec![
            "Title\n\nFirst line\nwraps here\r\n\r\nx < y".to_string(),
            String::new(),
        ];
        let html = render_text_html("doc.pdf", &pages);
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<title>doc.pdf</title>"));
        assert!(html.contains("<section class=\"page\" data-page=\"1\">\n<p>Title</p>\n<p>First line wraps here</p>\n<p>x &lt; y</p>\n</section>"));
        assert!(html.contains("<section class=\"page\" data-page=\"2\">\n</section>"));
    }
}
