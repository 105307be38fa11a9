//! Source acquisition over a loopback HTTP server.

mod common;

use common::{TestServer, FAKE_PDF};
use edgequake_pdf2html::pipeline::source::{acquire, SourceLocator, TEMP_PDF_NAME};
use edgequake_pdf2html::{ErrorKind, Pdf2HtmlError};

#[tokio::test]
async fn downloaded_bytes_match_the_served_document() {
    // Larger than one read buffer so the body arrives in several chunks.
    let mut body = FAKE_PDF.to_vec();
    body.extend((0..200_000u32).map(|i| (i % 251) as u8));
    let server = TestServer::start(vec![("/docs/paper.pdf", 200, body.clone())]).await;
    let work = tempfile::tempdir().unwrap();

    let locator = SourceLocator::parse(&server.url("/docs/paper.pdf"));
    assert!(locator.is_url());
    let doc = acquire(&locator, work.path(), None).await.unwrap();

    assert_eq!(doc.bytes, body);
    assert_eq!(doc.temp.path(), work.path().join(TEMP_PDF_NAME));
    assert_eq!(std::fs::read(doc.temp.path()).unwrap(), body);
    assert_eq!(doc.ocr_document_url(), server.url("/docs/paper.pdf"));

    drop(doc);
    assert!(!work.path().join(TEMP_PDF_NAME).exists());
}

#[tokio::test]
async fn not_found_is_a_retrieval_error_and_writes_nothing() {
    let server = TestServer::start(vec![]).await;
    let work = tempfile::tempdir().unwrap();

    let locator = SourceLocator::parse(&server.url("/missing.pdf"));
    let err = acquire(&locator, work.path(), None).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Retrieval);
    assert_eq!(err.status(), Some(404));
    assert!(matches!(err, Pdf2HtmlError::HttpStatus { .. }));
    assert!(!work.path().join(TEMP_PDF_NAME).exists());
}

#[tokio::test]
async fn server_error_carries_its_status() {
    let server = TestServer::start(vec![("/flaky.pdf", 503, b"busy".to_vec())]).await;
    let work = tempfile::tempdir().unwrap();

    let err = acquire(&SourceLocator::parse(&server.url("/flaky.pdf")), work.path(), None)
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(503));
}

#[tokio::test]
async fn file_urls_read_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local.pdf");
    std::fs::write(&path, FAKE_PDF).unwrap();
    let work = dir.path().join("work");

    let locator = SourceLocator::parse(&format!("file://{}", path.display()));
    assert!(!locator.is_url());
    let doc = acquire(&locator, &work, None).await.unwrap();
    assert_eq!(doc.bytes, FAKE_PDF);
    assert!(work.join(TEMP_PDF_NAME).exists());
}
