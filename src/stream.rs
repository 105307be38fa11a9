//! Streaming output: fan generated fragments out to an ordered set of sinks.
//!
//! [`drain_to_sinks`] pulls a [`FragmentStream`] to completion, appending
//! each fragment to the assembled buffer and handing it to every sink in
//! order, as it arrives. Every sink is finished (flushed and closed) once
//! the stream ends, whether it ended normally or with an error, so a failed
//! or truncated run still leaves its partial output on disk.

use crate::error::Pdf2HtmlError;
use crate::pipeline::llm::{FinishReason, FragmentStream, GenerationEvent};
use crate::progress::{PipelineStage, ProgressCallback};
use async_trait::async_trait;
use futures::StreamExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

/// A destination for streamed fragments.
#[async_trait]
pub trait FragmentSink: Send {
    async fn write(&mut self, fragment: &str) -> Result<(), Pdf2HtmlError>;

    /// Flush and close. Called exactly once, after the last `write`.
    async fn finish(&mut self) -> Result<(), Pdf2HtmlError>;
}

/// Mirrors fragments to a blocking writer, stdout by default. Flushed per fragment.
pub struct ConsoleSink<W: Write + Send = std::io::Stdout> {
    out: W,
}

impl ConsoleSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self { out: std::io::stdout() }
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

fn console_error(e: std::io::Error) -> Pdf2HtmlError {
    Pdf2HtmlError::OutputWriteFailed {
        path: PathBuf::from("<stdout>"),
        source: e,
    }
}

#[async_trait]
impl<W: Write + Send> FragmentSink for ConsoleSink<W> {
    async fn write(&mut self, fragment: &str) -> Result<(), Pdf2HtmlError> {
        self.out.write_all(fragment.as_bytes()).map_err(console_error)?;
        self.out.flush().map_err(console_error)
    }

    async fn finish(&mut self) -> Result<(), Pdf2HtmlError> {
        self.out.write_all(b"\n").map_err(console_error)?;
        self.out.flush().map_err(console_error)
    }
}

/// Writes fragments to a file as they arrive.
pub struct FileSink {
    path: PathBuf,
    writer: BufWriter<tokio::fs::File>,
}

impl FileSink {
    /// Create (or truncate) `path`, creating parent directories as needed.
    pub async fn create(path: &Path) -> Result<Self, Pdf2HtmlError> {
        let fail = |e| Pdf2HtmlError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(fail)?;
        }
        let file = tokio::fs::File::create(path).await.map_err(fail)?;
        debug!("Streaming output to {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fail(&self, e: std::io::Error) -> Pdf2HtmlError {
        Pdf2HtmlError::OutputWriteFailed {
            path: self.path.clone(),
            source: e,
        }
    }
}

#[async_trait]
impl FragmentSink for FileSink {
    async fn write(&mut self, fragment: &str) -> Result<(), Pdf2HtmlError> {
        self.writer
            .write_all(fragment.as_bytes())
            .await
            .map_err(|e| self.fail(e))
    }

    async fn finish(&mut self) -> Result<(), Pdf2HtmlError> {
        self.writer.flush().await.map_err(|e| self.fail(e))?;
        self.writer.get_mut().sync_all().await.map_err(|e| self.fail(e))
    }
}

/// What a drained stream produced.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSummary {
    /// Concatenation of every fragment, in arrival order.
    pub text: String,
    pub finish_reason: FinishReason,
    pub fragments: usize,
}

/// Drain `stream` into `sinks`, then finish every sink.
///
/// The first stream or sink error stops consumption; sinks are still
/// finished before that error is returned.
pub async fn drain_to_sinks(
    mut stream: FragmentStream,
    sinks: &mut [Box<dyn FragmentSink>],
    progress: Option<(&ProgressCallback, PipelineStage)>,
) -> Result<StreamSummary, Pdf2HtmlError> {
    let mut text = String::new();
    let mut fragments = 0usize;
    let mut finish_reason = None;
    let mut failure = None;

    'consume: while let Some(event) = stream.next().await {
        match event {
            Ok(GenerationEvent::Text(fragment)) => {
                fragments += 1;
                text.push_str(&fragment);
                for sink in sinks.iter_mut() {
                    if let Err(e) = sink.write(&fragment).await {
                        failure = Some(e);
                        break 'consume;
                    }
                }
                if let Some((cb, stage)) = progress {
                    cb.on_fragment(stage, text.len());
                }
            }
            Ok(GenerationEvent::Finished(reason)) => finish_reason = Some(reason),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    for sink in sinks.iter_mut() {
        if let Err(e) = sink.finish().await {
            warn!("Failed to finalise output sink: {}", e);
            failure.get_or_insert(e);
        }
    }

    if let Some(e) = failure {
        return Err(e);
    }
    Ok(StreamSummary {
        text,
        finish_reason: finish_reason.unwrap_or(FinishReason::Unknown),
        fragments,
    })
}
