//! Shared fixtures for the integration tests: a loopback HTTP server and
//! in-memory stand-ins for every external service.

#![allow(dead_code)]

use async_trait::async_trait;
use edgequake_pdf2html::pipeline::llm::{
    FragmentStream, GenerationEvent, GenerationRequest, TextGenerator,
};
use edgequake_pdf2html::pipeline::ocr::{OcrPage, OcrService};
use edgequake_pdf2html::pipeline::publish::{ObjectStore, UploadFile, UploadedObject};
use edgequake_pdf2html::pipeline::render::{Page, RasterOutput, RasterTermination, Rasterizer};
use edgequake_pdf2html::pipeline::source::SourceDocument;
use edgequake_pdf2html::{FinishReason, Pdf2HtmlError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

// ── Loopback HTTP server ─────────────────────────────────────────────────────

/// One canned response. `$BASE` in a body is replaced by the server's base URL.
#[derive(Debug, Clone)]
pub struct Route {
    method: Option<String>,
    path: String,
    status: u16,
    pieces: Vec<Vec<u8>>,
}

impl Route {
    /// Answers `path` for any method.
    pub fn any(path: &str, status: u16, body: Vec<u8>) -> Self {
        Self {
            method: None,
            path: path.to_string(),
            status,
            pieces: vec![body],
        }
    }

    pub fn new(method: &str, path: &str, status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            method: Some(method.to_string()),
            ..Self::any(path, status, body.into())
        }
    }

    /// Streams the body in the given pieces, flushing and pausing between
    /// them, with no Content-Length.
    pub fn in_pieces(method: &str, path: &str, pieces: &[&str]) -> Self {
        Self {
            method: Some(method.to_string()),
            path: path.to_string(),
            status: 200,
            pieces: pieces.iter().map(|p| p.as_bytes().to_vec()).collect(),
        }
    }

    fn matches(&self, method: &str, path: &str) -> bool {
        self.path == path && self.method.as_deref().map_or(true, |m| m == method)
    }
}

/// A request the server received.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

/// Serves canned responses on 127.0.0.1 and records every request.
pub struct TestServer {
    pub base_url: String,
    log: Arc<Mutex<Vec<Recorded>>>,
}

impl TestServer {
    /// Path-only routes answering any method.
    pub async fn start(routes: Vec<(&str, u16, Vec<u8>)>) -> Self {
        Self::serve(
            routes
                .into_iter()
                .map(|(path, status, body)| Route::any(path, status, body))
                .collect(),
        )
        .await
    }

    pub async fn serve(routes: Vec<Route>) -> Self {
        let routes = Arc::new(routes);
        let log = Arc::new(Mutex::new(Vec::new()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let (task_log, task_base) = (log.clone(), base_url.clone());
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let (routes, log, base) = (routes.clone(), task_log.clone(), task_base.clone());
                tokio::spawn(async move {
                    handle(socket, &routes, &log, &base).await;
                });
            }
        });

        Self { base_url, log }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.log.lock().unwrap().clone()
    }

    /// `"METHOD /path"` for every request, in arrival order.
    pub fn seen(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| format!("{} {}", r.method, r.path))
            .collect()
    }
}

async fn handle(mut socket: TcpStream, routes: &[Route], log: &Mutex<Vec<Recorded>>, base: &str) {
    let Some(request) = read_request(&mut socket).await else {
        return;
    };
    let route = routes
        .iter()
        .find(|r| r.matches(&request.method, &request.path))
        .cloned()
        .unwrap_or_else(|| Route::any(&request.path, 404, b"not found".to_vec()));
    log.lock().unwrap().push(request);

    let pieces: Vec<Vec<u8>> = route
        .pieces
        .iter()
        .map(|p| match std::str::from_utf8(p) {
            Ok(text) => text.replace("$BASE", base).into_bytes(),
            Err(_) => p.clone(),
        })
        .collect();
    let status = route.status;
    let reason = if status == 200 { "OK" } else { "Error" };
    let length = match pieces.as_slice() {
        [single] => format!("Content-Length: {}\r\n", single.len()),
        _ => String::new(),
    };
    let header = format!(
        "HTTP/1.1 {status} {reason}\r\n{length}Content-Type: application/octet-stream\r\nConnection: close\r\n\r\n"
    );
    let _ = socket.write_all(header.as_bytes()).await;
    for piece in &pieces {
        let _ = socket.write_all(piece).await;
        let _ = socket.flush().await;
        if pieces.len() > 1 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
    let _ = socket.shutdown().await;
}

async fn read_request(socket: &mut TcpStream) -> Option<Recorded> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };
    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    let header = |name: &str| {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    };

    let mut body = buf[head_end..].to_vec();
    if let Some(len) = header("content-length").and_then(|v| v.parse::<usize>().ok()) {
        while body.len() < len {
            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => body.extend_from_slice(&chunk[..n]),
            }
        }
    } else if header("transfer-encoding").is_some_and(|v| v.eq_ignore_ascii_case("chunked")) {
        while !body.ends_with(b"0\r\n\r\n") {
            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => body.extend_from_slice(&chunk[..n]),
            }
        }
        body = dechunk(&body);
    }

    Some(Recorded {
        method,
        path,
        headers,
        body,
    })
}

fn dechunk(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut rest = raw;
    while let Some(pos) = rest.windows(2).position(|w| w == b"\r\n") {
        let size = std::str::from_utf8(&rest[..pos])
            .ok()
            .and_then(|s| usize::from_str_radix(s.trim(), 16).ok())
            .unwrap_or(0);
        if size == 0 {
            break;
        }
        let start = pos + 2;
        let end = (start + size).min(rest.len());
        out.extend_from_slice(&rest[start..end]);
        rest = &rest[(end + 2).min(rest.len())..];
    }
    out
}

// ── Fake services ────────────────────────────────────────────────────────────

/// A minimal byte sequence that looks like a PDF to the pipeline.
pub const FAKE_PDF: &[u8] = b"%PDF-1.4\n% fake test document\n%%EOF\n";

/// Returns `pages` fixed PNG payloads.
pub struct FakeRasterizer {
    pub pages: usize,
}

#[async_trait]
impl Rasterizer for FakeRasterizer {
    fn name(&self) -> &str {
        "fake"
    }

    async fn rasterize(&self, _doc: &SourceDocument) -> Result<RasterOutput, Pdf2HtmlError> {
        Ok(RasterOutput {
            pages: (1..=self.pages)
                .map(|index| Page {
                    index,
                    png: format!("png-{index}").into_bytes(),
                })
                .collect(),
            termination: RasterTermination::Complete,
        })
    }
}

/// Stores uploads in memory and records deletions.
#[derive(Default)]
pub struct MemoryStore {
    pub uploaded: Mutex<Vec<UploadFile>>,
    pub deleted: Mutex<Vec<String>>,
    pub fail_delete: bool,
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn upload(&self, files: Vec<UploadFile>) -> Result<Vec<UploadedObject>, Pdf2HtmlError> {
        let objects = files
            .iter()
            .map(|f| UploadedObject {
                custom_id: Some(f.custom_id.clone()),
                url: Some(format!("https://files.test/f/{}", f.custom_id)),
            })
            .collect();
        self.uploaded.lock().unwrap().extend(files);
        Ok(objects)
    }

    async fn delete(&self, keys: &[String]) -> Result<usize, Pdf2HtmlError> {
        if self.fail_delete {
            return Err(Pdf2HtmlError::Upload("delete rejected".into()));
        }
        self.deleted.lock().unwrap().extend(keys.iter().cloned());
        Ok(keys.len())
    }
}

/// Answers every document with the same pages.
pub struct ScriptedOcr {
    pub pages: Vec<OcrPage>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedOcr {
    /// One markdown page per entry, with 0-based indices like the real service.
    pub fn with_pages(markdown: &[&str]) -> Self {
        Self {
            pages: markdown
                .iter()
                .enumerate()
                .map(|(index, md)| OcrPage {
                    index,
                    markdown: md.to_string(),
                })
                .collect(),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl OcrService for ScriptedOcr {
    async fn process(&self, document_url: &str) -> Result<Vec<OcrPage>, Pdf2HtmlError> {
        self.calls.lock().unwrap().push(document_url.to_string());
        Ok(self.pages.clone())
    }
}

/// An OCR service that always fails.
pub struct FailingOcr;

#[async_trait]
impl OcrService for FailingOcr {
    async fn process(&self, _document_url: &str) -> Result<Vec<OcrPage>, Pdf2HtmlError> {
        Err(Pdf2HtmlError::Extraction("HTTP 500 from OCR".into()))
    }
}

/// Emits fixed fragments and a finish reason, recording every request.
pub struct ScriptedGenerator {
    pub label: String,
    pub fragments: Vec<String>,
    pub finish: FinishReason,
    pub requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(label: &str, fragments: &[&str], finish: FinishReason) -> Self {
        Self {
            label: label.to_string(),
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            finish,
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> String {
        self.label.clone()
    }

    async fn stream(&self, request: GenerationRequest) -> Result<FragmentStream, Pdf2HtmlError> {
        self.requests.lock().unwrap().push(request);
        let mut events: Vec<Result<GenerationEvent, Pdf2HtmlError>> = self
            .fragments
            .iter()
            .map(|f| Ok(GenerationEvent::Text(f.clone())))
            .collect();
        events.push(Ok(GenerationEvent::Finished(self.finish.clone())));
        Ok(Box::pin(futures::stream::iter(events)))
    }
}
