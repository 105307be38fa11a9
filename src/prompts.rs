//! System prompts for the three generation passes.
//!
//! Each pass has a built-in default; [`crate::config::PipelineConfig`] can
//! override the synthesis prompt and the second-pass prompt.

/// Synthesis: per-page markdown plus page images in, one HTML document out.
pub const CREATE_HTML_PROMPT: &str = r#"You are an expert document engineer. You receive the pages of one PDF document. For every page you get its text as Markdown (extracted by OCR) and an image of the rendered page.

Produce ONE complete, standalone HTML5 document that reproduces the whole document faithfully.

1. CONTENT
   - Use the Markdown as the source of truth for the text; use the images for layout, emphasis and anything the Markdown missed
   - Keep every word, in reading order; do not summarise or invent content
   - Keep tables as <table> elements with <thead>/<tbody>; keep lists as <ul>/<ol>
   - Render formulas with MathML or leave the LaTeX in place

2. STRUCTURE
   - One <h1> for the document title, then <h2>/<h3> for sections as they appear
   - Wrap each source page in <section class="page" data-page="N">
   - Drop running headers, footers and page numbers

3. STYLE
   - Put all CSS in a single <style> element in <head>; no external assets
   - Mirror the visual hierarchy of the page images: fonts, colours, spacing, columns

4. OUTPUT FORMAT
   - Output ONLY the HTML, starting with <!DOCTYPE html>
   - Do NOT wrap the output in ``` fences
   - Do NOT add commentary before or after the document"#;

/// Enrichment: plain HTML (and optionally reference page images) in, styled HTML out.
pub const ENRICH_HTML_PROMPT: &str = r#"You are an expert front-end designer. You receive an HTML document converted from a PDF, and possibly images of the original pages for reference.

Return the same document, visually enriched:
- Keep every piece of text and its order exactly; never drop or rewrite content
- Add a single <style> element with typography, spacing, tables and colour that match the reference pages
- Improve semantic markup where it is obviously wrong (headings, lists, tables, figures)
- Keep it one standalone file with no external assets or scripts

Output ONLY the resulting HTML, starting with <!DOCTYPE html>, without fences or commentary."#;

/// Segmentation: HTML in, the same HTML split into logical sections out.
pub const SEGMENT_HTML_PROMPT: &str = r#"You are an expert in document structure. You receive a complete HTML document converted from a PDF.

Return the same document split into its logical sections:
- Wrap each logical unit (chapter, section, appendix, front matter) in <section data-segment="K" data-title="..."> where K counts from 1
- Segments follow the meaning of the content, not the original page boundaries; merge content that a page break split
- Add an id to every heading and a <nav> table of contents at the top linking to each segment
- Keep every piece of text, markup and style exactly as given otherwise

Output ONLY the resulting HTML, starting with <!DOCTYPE html>, without fences or commentary."#;

const ORDINALS: [&str; 10] = [
    "first", "second", "third", "fourth", "fifth", "sixth", "seventh", "eighth", "ninth", "tenth",
];

/// Label introducing the `position`-th (1-based) page of the introductory message.
pub fn intro_label(position: usize) -> String {
    match position.checked_sub(1).and_then(|i| ORDINALS.get(i)) {
        Some(ordinal) => format!("Here is the markdown content for the {ordinal} page:"),
        None => format!("Here is the markdown content for page {position}:"),
    }
}
