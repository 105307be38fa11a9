//! Running external tools with an optional timeout.

use crate::error::Pdf2HtmlError;
use std::ffi::OsStr;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Run `program args…` to completion and capture its output.
///
/// A missing executable is [`Pdf2HtmlError::ToolUnavailable`]; exceeding
/// `timeout` kills the child and returns [`Pdf2HtmlError::ToolTimeout`].
/// A non-zero exit is *not* an error here; callers inspect the status.
pub async fn run_tool<S: AsRef<OsStr>>(
    program: &OsStr,
    args: &[S],
    timeout: Option<Duration>,
) -> Result<Output, Pdf2HtmlError> {
    let tool = program.to_string_lossy().to_string();
    let mut cmd = Command::new(program);
    cmd.args(args).kill_on_drop(true);
    debug!(
        "Running {} {}",
        tool,
        args.iter()
            .map(|a| a.as_ref().to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    );

    let fut = cmd.output();
    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Pdf2HtmlError::ToolTimeout {
                tool: tool.clone(),
                secs: limit.as_secs(),
            })?,
        None => fut.await,
    };
    result.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Pdf2HtmlError::ToolUnavailable {
                tool,
                detail: "executable not found on PATH".into(),
            }
        } else {
            Pdf2HtmlError::ToolFailed {
                tool,
                detail: e.to_string(),
            }
        }
    })
}

/// Last non-blank stderr line, for error messages.
pub fn stderr_tail(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .unwrap_or("no diagnostic output")
        .to_string()
}
