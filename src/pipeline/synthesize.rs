//! Request builders for the synthesis, enrichment and segmentation passes.
//!
//! Synthesis sends two user turns:
//!
//! 1. an introductory turn with a label and the image of each of the first
//!    `intro_pages` pages;
//! 2. a bulk turn with the markdown and image of *every* page.
//!
//! The first pages therefore appear twice. `intro_pages = 0` drops the
//! introductory turn and sends each page once.

use crate::pipeline::join::PageInput;
use crate::pipeline::llm::{GenerationRequest, ImageRef, UserMessage};
use crate::prompts;

/// Build the synthesis request for `pages` (already in page order).
pub fn synthesis_request(
    pages: &[PageInput],
    system: &str,
    intro_pages: usize,
    max_tokens: u32,
) -> GenerationRequest {
    let mut messages = Vec::with_capacity(2);

    if intro_pages > 0 && !pages.is_empty() {
        let mut intro = UserMessage::default();
        for (pos, page) in pages.iter().take(intro_pages).enumerate() {
            intro.push_text(prompts::intro_label(pos + 1));
            intro.push_image(page.image.clone());
        }
        messages.push(intro);
    }

    let mut bulk = UserMessage::default();
    for page in pages {
        bulk.push_text(page.markdown.clone());
        bulk.push_image(page.image.clone());
    }
    messages.push(bulk);

    GenerationRequest {
        system: system.to_string(),
        messages,
        max_tokens,
    }
}

/// Enrichment: the HTML followed by optional reference page images.
pub fn enrich_request(
    html: &str,
    references: &[ImageRef],
    system: &str,
    max_tokens: u32,
) -> GenerationRequest {
    let mut msg = UserMessage::text(html);
    for image in references {
        msg.push_image(image.clone());
    }
    GenerationRequest {
        system: system.to_string(),
        messages: vec![msg],
        max_tokens,
    }
}

/// Segmentation: the HTML as a single text turn.
pub fn segment_request(html: &str, system: &str, max_tokens: u32) -> GenerationRequest {
    GenerationRequest {
        system: system.to_string(),
        messages: vec![UserMessage::text(html)],
        max_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::llm::ContentPart;

    fn page(index: usize) -> PageInput {
        PageInput {
            index,
            markdown: format!("md {index}"),
            image: ImageRef::Url(format!("https://f/{index}")),
        }
    }

    #[test]
    fn intro_turn_repeats_first_pages() {
        let pages: Vec<_> = (1..=3).map(page).collect();
        let req = synthesis_request(&pages, "sys", 2, 32_000);
        assert_eq!(req.messages.len(), 2);

        let intro = &req.messages[0].parts;
        assert_eq!(intro.len(), 4);
        assert_eq!(
            intro[0],
            ContentPart::Text("Here is the markdown content for the first page:".into())
        );
        assert_eq!(intro[3], ContentPart::Image(ImageRef::Url("https://f/2".into())));

        let bulk = &req.messages[1].parts;
        assert_eq!(bulk.len(), 6);
        assert_eq!(bulk[4], ContentPart::Text("md 3".into()));
        assert_eq!(req.max_tokens, 32_000);
    }

    #[test]
    fn zero_intro_pages_sends_each_page_once() {
        let pages: Vec<_> = (1..=2).map(page).collect();
        let req = synthesis_request(&pages, "sys", 0, 10);
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].images().count(), 2);
    }

    #[test]
    fn single_page_intro_has_one_pair() {
        let req = synthesis_request(&[page(1)], "sys", 2, 10);
        assert_eq!(req.messages[0].parts.len(), 2);
    }

    #[test]
    fn secondary_requests() {
        let refs = vec![ImageRef::Url("https://f/1".into())];
        let req = enrich_request("<p>x</p>", &refs, "sys", 5);
        assert_eq!(req.messages[0].parts[0], ContentPart::Text("<p>x</p>".into()));
        assert_eq!(req.messages[0].images().count(), 1);

        let req = segment_request("<p>x</p>", "seg", 64_000);
        assert_eq!(req.system, "seg");
        assert_eq!(req.messages, vec![UserMessage::text("<p>x</p>")]);
    }
}
