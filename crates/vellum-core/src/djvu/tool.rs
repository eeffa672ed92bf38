//! Adapter around the djvulibre command-line tools.
//!
//! Wraps process spawn, argument construction, and output capture into
//! single async calls. Ordinary converter failures (non-zero exit, bad
//! input) come back as [`ToolError::Failed`], never as a panic or an
//! unhandled fault; only a missing binary surfaces as a launch error.
//! Concurrent invocations are independent: each call owns its output path
//! and shares nothing with its siblings.

use std::path::Path;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

/// Page selection for a single converter invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageSelector {
    All,
    /// Inclusive 1-based range.
    Range(u32, u32),
    /// Explicit 1-based page numbers.
    Pages(Vec<u32>),
}

impl PageSelector {
    /// Render the ddjvu `-page=` argument; `None` selects every page.
    fn to_arg(&self) -> Option<String> {
        match self {
            PageSelector::All => None,
            PageSelector::Range(from, to) => Some(format!("-page={from}-{to}")),
            PageSelector::Pages(pages) => {
                let list = pages
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                Some(format!("-page={list}"))
            }
        }
    }
}

/// Failure of one external tool invocation.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The binary could not be spawned (missing or not executable).
    #[error("failed to launch {tool}: {source}")]
    Launch {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    /// The tool ran and reported failure.
    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: ExitStatus,
        stderr: String,
    },
    /// The invocation was cancelled and the child process killed.
    #[error("invocation cancelled")]
    Cancelled,
}

/// Converts source pages into target-format artifacts.
///
/// The seam exists so the pipelines can run against a scripted converter in
/// tests; production code uses [`DjvuTool`].
#[async_trait]
pub trait PageConverter: Send + Sync {
    /// Convert the selected pages into a single PDF at `out`.
    async fn pages_to_pdf(
        &self,
        source: &Path,
        out: &Path,
        pages: &PageSelector,
        cancel: &CancellationToken,
    ) -> Result<(), ToolError>;

    /// Render one page to a raster image at `out`, scaled to `scale_percent`
    /// of the source resolution.
    async fn page_to_image(
        &self,
        source: &Path,
        out: &Path,
        page: u32,
        scale_percent: u32,
        cancel: &CancellationToken,
    ) -> Result<(), ToolError>;
}

/// The djvulibre implementation.
#[derive(Debug, Clone)]
pub struct DjvuTool {
    pub(super) ddjvu: String,
    pub(super) djvused: String,
    pub(super) djvutxt: String,
}

impl DjvuTool {
    pub fn new(config: &Config) -> Self {
        Self {
            ddjvu: config.ddjvu_bin.clone(),
            djvused: config.djvused_bin.clone(),
            djvutxt: config.djvutxt_bin.clone(),
        }
    }
}

/// Run a tool to completion, capturing stdout/stderr.
///
/// When a cancellation token fires mid-flight the child is killed (the
/// process handle is dropped with `kill_on_drop`) and `Cancelled` returned.
pub(super) async fn run_tool(
    bin: &str,
    args: &[String],
    cancel: Option<&CancellationToken>,
) -> Result<std::process::Output, ToolError> {
    tracing::debug!(tool = bin, ?args, "invoking external tool");

    let child = Command::new(bin)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ToolError::Launch {
            tool: bin.to_string(),
            source,
        })?;

    let waited = match cancel {
        Some(token) => {
            tokio::select! {
                _ = token.cancelled() => return Err(ToolError::Cancelled),
                output = child.wait_with_output() => output,
            }
        }
        None => child.wait_with_output().await,
    };

    let output = waited.map_err(|source| ToolError::Launch {
        tool: bin.to_string(),
        source,
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(ToolError::Failed {
            tool: bin.to_string(),
            status: output.status,
            stderr,
        });
    }
    Ok(output)
}

#[async_trait]
impl PageConverter for DjvuTool {
    async fn pages_to_pdf(
        &self,
        source: &Path,
        out: &Path,
        pages: &PageSelector,
        cancel: &CancellationToken,
    ) -> Result<(), ToolError> {
        let mut args = vec!["-format=pdf".to_string()];
        if let Some(page_arg) = pages.to_arg() {
            args.push(page_arg);
        }
        args.push(source.display().to_string());
        args.push(out.display().to_string());

        run_tool(&self.ddjvu, &args, Some(cancel)).await?;
        Ok(())
    }

    async fn page_to_image(
        &self,
        source: &Path,
        out: &Path,
        page: u32,
        scale_percent: u32,
        cancel: &CancellationToken,
    ) -> Result<(), ToolError> {
        let args = vec![
            "-format=ppm".to_string(),
            format!("-page={page}"),
            format!("-scale={scale_percent}"),
            source.display().to_string(),
            out.display().to_string(),
        ];

        run_tool(&self.ddjvu, &args, Some(cancel)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_selector_arguments() {
        assert_eq!(PageSelector::All.to_arg(), None);
        assert_eq!(
            PageSelector::Range(1, 3).to_arg(),
            Some("-page=1-3".to_string())
        );
        assert_eq!(
            PageSelector::Pages(vec![2, 5, 9]).to_arg(),
            Some("-page=2,5,9".to_string())
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_launch_error() {
        let err = run_tool("definitely-not-a-real-binary", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Launch { .. }));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_a_typed_failure() {
        let args = vec!["-c".to_string(), "echo bad input >&2; exit 3".to_string()];
        let err = run_tool("sh", &args, None).await.unwrap_err();
        match err {
            ToolError::Failed { stderr, .. } => assert_eq!(stderr, "bad input"),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancellation_kills_the_invocation() {
        let token = CancellationToken::new();
        token.cancel();
        let args = vec!["-c".to_string(), "sleep 30".to_string()];
        let err = run_tool("sh", &args, Some(&token)).await.unwrap_err();
        assert!(matches!(err, ToolError::Cancelled));
    }
}
