//! Ghostscript rasterisation driven by a shell-script stand-in for `gs`.

#![cfg(unix)]

mod common;

use common::FAKE_PDF;
use edgequake_pdf2html::pipeline::render::{GhostscriptRasterizer, RasterTermination, Rasterizer};
use edgequake_pdf2html::pipeline::source::{acquire, SourceLocator};
use std::path::Path;

/// `count` is what the page-count query prints (empty: the query fails).
/// Pages up to `pages` render; `crash_at` exits with an unrelated error.
fn fake_gs(dir: &Path, count: &str, pages: usize, crash_at: Option<usize>) -> String {
    let count_branch = if count.is_empty() {
        "echo 'Error: /undefined in runpdfbegin' >&2; exit 1".to_string()
    } else {
        format!("echo {count}; exit 0")
    };
    let crash = crash_at.unwrap_or(0);
    let script = format!(
        r#"#!/bin/sh
page=""
out=""
for a in "$@"; do
  case "$a" in
    -dNODISPLAY) {count_branch} ;;
    -dFirstPage=*) page="${{a#-dFirstPage=}}" ;;
    -sOutputFile=*) out="${{a#-sOutputFile=}}" ;;
  esac
done
if [ "$page" -eq {crash} ]; then
  echo "Unrecoverable error, exit code 1" >&2
  exit 1
fi
if [ "$page" -gt {pages} ]; then
  echo "   **** Error: Requested FirstPage is greater than the number of pages in the file: {pages}" >&2
  exit 1
fi
printf 'PNG page %s' "$page" > "$out"
"#
    );
    let path = dir.join("fake-gs.sh");
    std::fs::write(&path, script).unwrap();
    path.display().to_string()
}

async fn document(dir: &Path) -> edgequake_pdf2html::pipeline::source::SourceDocument {
    let pdf = dir.join("in.pdf");
    std::fs::write(&pdf, FAKE_PDF).unwrap();
    acquire(&SourceLocator::Local(pdf), dir, None).await.unwrap()
}

#[tokio::test]
async fn probing_stops_at_end_of_document() {
    let dir = tempfile::tempdir().unwrap();
    let script = fake_gs(dir.path(), "", 2, None);
    let doc = document(dir.path()).await;

    let gs = GhostscriptRasterizer::new(dir.path(), 150, 100).with_program("sh", vec![script]);
    let out = gs.rasterize(&doc).await.unwrap();

    assert_eq!(out.pages.len(), 2);
    assert_eq!(out.pages[0].index, 1);
    assert_eq!(out.pages[1].png, b"PNG page 2");
    assert_eq!(out.termination, RasterTermination::EndOfDocument);
}

#[tokio::test]
async fn crash_is_reported_not_mistaken_for_the_end() {
    let dir = tempfile::tempdir().unwrap();
    let script = fake_gs(dir.path(), "", 5, Some(2));
    let doc = document(dir.path()).await;

    let gs = GhostscriptRasterizer::new(dir.path(), 150, 100).with_program("sh", vec![script]);
    let out = gs.rasterize(&doc).await.unwrap();

    assert_eq!(out.pages.len(), 1);
    match out.termination {
        RasterTermination::ToolFailed { page, detail } => {
            assert_eq!(page, 2);
            assert!(detail.contains("Unrecoverable error"), "{detail}");
        }
        other => panic!("unexpected termination: {other:?}"),
    }
}

#[tokio::test]
async fn known_page_count_renders_exactly_that_many() {
    let dir = tempfile::tempdir().unwrap();
    let script = fake_gs(dir.path(), "3", 3, None);
    let doc = document(dir.path()).await;

    let gs = GhostscriptRasterizer::new(dir.path(), 150, 100).with_program("sh", vec![script]);
    let out = gs.rasterize(&doc).await.unwrap();

    assert_eq!(out.pages.iter().map(|p| p.index).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(out.termination, RasterTermination::Complete);
}

#[tokio::test]
async fn page_ceiling_caps_long_documents() {
    let dir = tempfile::tempdir().unwrap();
    let script = fake_gs(dir.path(), "", 50, None);
    let doc = document(dir.path()).await;

    let gs = GhostscriptRasterizer::new(dir.path(), 150, 4).with_program("sh", vec![script]);
    let out = gs.rasterize(&doc).await.unwrap();

    assert_eq!(out.pages.len(), 4);
    assert_eq!(out.termination, RasterTermination::Ceiling { limit: 4 });
}

#[tokio::test]
async fn missing_binary_is_an_external_tool_error() {
    let dir = tempfile::tempdir().unwrap();
    let doc = document(dir.path()).await;

    let gs = GhostscriptRasterizer::new(dir.path(), 150, 100)
        .with_program("definitely-not-ghostscript-42", Vec::new());
    let err = gs.rasterize(&doc).await.unwrap_err();
    assert_eq!(err.kind().to_string(), "ExternalToolError");
}
