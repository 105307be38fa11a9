//! High-fidelity conversion with pdf2htmlEX running in a container.
//!
//! The work directory is mounted at `/pdf`; pdf2htmlEX writes
//! `<stem>.html` next to the input, which is then moved to the requested
//! output path.

use crate::config::ConverterOptions;
use crate::error::Pdf2HtmlError;
use crate::pipeline::tool::{self, stderr_tail};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const TOOL: &str = "pdf2htmlEX";

/// Runs pdf2htmlEX through a container runtime (`docker` by default).
#[derive(Debug, Clone)]
pub struct ContainerConverter {
    runtime: OsString,
    options: ConverterOptions,
    timeout: Option<Duration>,
}

impl ContainerConverter {
    pub fn new(options: ConverterOptions, timeout: Option<Duration>) -> Self {
        Self {
            runtime: OsString::from("docker"),
            options,
            timeout,
        }
    }

    /// Use another OCI runtime with a docker-compatible CLI, e.g. `podman`.
    pub fn with_runtime(mut self, runtime: impl Into<OsString>) -> Self {
        self.runtime = runtime.into();
        self
    }

    /// Fail with [`Pdf2HtmlError::ToolUnavailable`] unless the runtime answers.
    pub async fn check_available(&self) -> Result<(), Pdf2HtmlError> {
        let output = tool::run_tool(&self.runtime, &["version"], self.timeout).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Pdf2HtmlError::ToolUnavailable {
                tool: self.runtime.to_string_lossy().to_string(),
                detail: stderr_tail(&output),
            })
        }
    }

    /// Container invocation for `pdf_name` inside the mounted `work_dir`.
    pub fn run_args(&self, work_dir: &Path, pdf_name: &str) -> Vec<String> {
        let o = &self.options;
        vec![
            "run".into(),
            "--rm".into(),
            "-v".into(),
            format!("{}:/pdf", work_dir.display()),
            o.image.clone(),
            TOOL.into(),
            "--zoom".into(),
            o.zoom.to_string(),
            "--dpi".into(),
            o.dpi.to_string(),
            "--split-pages".into(),
            if o.split_pages { "1" } else { "0" }.into(),
            "--embed-font".into(),
            if o.embed_fonts { "1" } else { "0" }.into(),
            "--dest-dir".into(),
            "/pdf".into(),
            format!("/pdf/{pdf_name}"),
        ]
    }

    /// Convert `pdf` (which must live directly in its work directory) to `output`.
    pub async fn convert(&self, pdf: &Path, output: &Path) -> Result<PathBuf, Pdf2HtmlError> {
        let failed = |detail: String| Pdf2HtmlError::ToolFailed {
            tool: TOOL.into(),
            detail,
        };
        let work_dir = pdf
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let work_dir = tokio::fs::canonicalize(work_dir)
            .await
            .map_err(|e| failed(format!("work directory: {e}")))?;
        let pdf_name = pdf
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| failed("input has no file name".into()))?;

        self.check_available().await?;
        info!("Running {} in {}", TOOL, self.options.image);

        let run = tool::run_tool(&self.runtime, &self.run_args(&work_dir, &pdf_name), self.timeout).await?;
        if !run.status.success() {
            return Err(failed(stderr_tail(&run)));
        }

        let generated = work_dir.join(&pdf_name).with_extension("html");
        debug!("Moving {} to {}", generated.display(), output.display());
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Pdf2HtmlError::OutputWriteFailed {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        if tokio::fs::rename(&generated, output).await.is_err() {
            tokio::fs::copy(&generated, output)
                .await
                .map_err(|e| failed(format!("no output at {}: {e}", generated.display())))?;
            let _ = tokio::fs::remove_file(&generated).await;
        }
        Ok(output.to_path_buf())
    }
}
