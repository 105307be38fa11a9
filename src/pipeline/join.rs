//! Join markdown units with page images by page number.
//!
//! Inner join: a markdown unit without an image, or an image without
//! markdown, is left out of synthesis. Both kinds of orphan are listed in
//! [`JoinDiagnostics`] so the loss is visible.

use crate::pipeline::llm::ImageRef;
use crate::pipeline::ocr::MarkdownUnit;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// One page ready for synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct PageInput {
    /// 1-based page number.
    pub index: usize,
    pub markdown: String,
    pub image: ImageRef,
}

/// Records that did not survive the join.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinDiagnostics {
    pub markdown_without_image: Vec<usize>,
    pub images_without_markdown: Vec<usize>,
}

impl JoinDiagnostics {
    pub fn is_lossless(&self) -> bool {
        self.markdown_without_image.is_empty() && self.images_without_markdown.is_empty()
    }
}

/// Pair markdown and images sharing a page number, in page order.
pub fn join_pages(
    units: &[MarkdownUnit],
    images: &[(usize, ImageRef)],
) -> (Vec<PageInput>, JoinDiagnostics) {
    let by_index: BTreeMap<usize, &ImageRef> = images.iter().map(|(i, img)| (*i, img)).collect();
    let mut diagnostics = JoinDiagnostics::default();
    let mut joined = Vec::with_capacity(units.len());

    for unit in units {
        match by_index.get(&unit.index) {
            Some(image) => joined.push(PageInput {
                index: unit.index,
                markdown: unit.text.clone(),
                image: (*image).clone(),
            }),
            None => diagnostics.markdown_without_image.push(unit.index),
        }
    }
    joined.sort_by_key(|p| p.index);

    diagnostics.images_without_markdown = by_index
        .keys()
        .filter(|i| !units.iter().any(|u| u.index == **i))
        .copied()
        .collect();
    diagnostics.markdown_without_image.sort_unstable();

    if !diagnostics.markdown_without_image.is_empty() {
        warn!("Dropping markdown for pages without an image: {:?}", diagnostics.markdown_without_image);
    }
    if !diagnostics.images_without_markdown.is_empty() {
        warn!("Dropping images for pages without markdown: {:?}", diagnostics.images_without_markdown);
    }
    (joined, diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(index: usize) -> MarkdownUnit {
        MarkdownUnit { index, text: format!("page {index}") }
    }

    fn url(index: usize) -> (usize, ImageRef) {
        (index, ImageRef::Url(format!("https://files.example/f/{index}")))
    }

    #[test]
    fn only_shared_indices_survive() {
        let (joined, diag) = join_pages(&[unit(1), unit(2), unit(4)], &[url(1), url(2), url(3)]);
        assert_eq!(joined.iter().map(|p| p.index).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(joined[1].markdown, "page 2");
        assert_eq!(diag.markdown_without_image, vec![4]);
        assert_eq!(diag.images_without_markdown, vec![3]);
        assert!(!diag.is_lossless());
    }

    #[test]
    fn output_is_in_page_order() {
        let (joined, diag) = join_pages(&[unit(2), unit(1)], &[url(2), url(1)]);
        assert_eq!(joined.iter().map(|p| p.index).collect::<Vec<_>>(), vec![1, 2]);
        assert!(diag.is_lossless());
    }
}
