//! Metadata probes over a source document.
//!
//! The four probes are independent: callers run them concurrently and a
//! failure in one never blocks the others. Only the page count can fail
//! the caller - a source whose page count cannot be read is corrupt and
//! nothing downstream can proceed. Everything else degrades to a safe
//! default.

use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use super::tool::{run_tool, DjvuTool};

/// Resolution assumed when the source does not report one.
pub const DEFAULT_DPI: u32 = 300;

/// Everything `get_info` reports about a source document.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub page_count: u32,
    pub dpi: u32,
    /// First-page geometry in source pixels; (0, 0) when unknown.
    pub page_width: u32,
    pub page_height: u32,
    pub outline_text: String,
    pub has_text: bool,
}

/// Read-side metadata seam, mirrored by the test harness.
#[async_trait]
pub trait SourceProbe: Send + Sync {
    /// Number of pages. The one probe that is fatal on failure.
    async fn page_count(&self, source: &Path) -> Result<u32>;

    /// First-page resolution in DPI; [`DEFAULT_DPI`] on any failure.
    async fn dpi(&self, source: &Path) -> u32;

    /// First-page geometry in source pixels; (0, 0) when unknown.
    async fn page_size(&self, source: &Path) -> (u32, u32);

    /// Raw outline s-expression; empty when absent or unreadable.
    async fn outline_text(&self, source: &Path) -> String;

    /// Whether the source carries an extractable hidden text layer.
    async fn has_text(&self, source: &Path) -> bool;
}

/// Run every probe concurrently and collect the result.
pub async fn probe_source(probe: &dyn SourceProbe, source: &Path) -> Result<SourceInfo> {
    let (page_count, dpi, (page_width, page_height), outline_text, has_text) = tokio::join!(
        probe.page_count(source),
        probe.dpi(source),
        probe.page_size(source),
        probe.outline_text(source),
        probe.has_text(source),
    );
    Ok(SourceInfo {
        page_count: page_count?,
        dpi,
        page_width,
        page_height,
        outline_text,
        has_text,
    })
}

impl DjvuTool {
    /// Run a djvused expression and return its stdout.
    async fn run_djvused(&self, source: &Path, expression: &str) -> Result<String> {
        let args = vec![
            "-e".to_string(),
            expression.to_string(),
            source.display().to_string(),
        ];
        let output = run_tool(&self.djvused, &args, None)
            .await
            .with_context(|| format!("djvused -e '{expression}' failed"))?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// First-page structure dump, the source of both DPI and geometry.
    async fn first_page_dump(&self, source: &Path) -> Result<String> {
        self.run_djvused(source, "select 1; dump").await
    }
}

#[async_trait]
impl SourceProbe for DjvuTool {
    async fn page_count(&self, source: &Path) -> Result<u32> {
        let stdout = self.run_djvused(source, "n").await?;
        let reported = stdout.trim();
        match reported.parse::<i64>() {
            Ok(n) if n > 0 => Ok(n as u32),
            _ => bail!("source reports invalid page count {reported:?}"),
        }
    }

    async fn dpi(&self, source: &Path) -> u32 {
        match self.first_page_dump(source).await {
            Ok(dump) => parse_info_line(&dump)
                .map(|(_, _, dpi)| dpi)
                .unwrap_or(DEFAULT_DPI),
            Err(e) => {
                tracing::debug!(source = %source.display(), error = %e, "dpi probe failed");
                DEFAULT_DPI
            }
        }
    }

    async fn page_size(&self, source: &Path) -> (u32, u32) {
        match self.first_page_dump(source).await {
            Ok(dump) => parse_info_line(&dump)
                .map(|(w, h, _)| (w, h))
                .unwrap_or((0, 0)),
            Err(_) => (0, 0),
        }
    }

    async fn outline_text(&self, source: &Path) -> String {
        match self.run_djvused(source, "print-outline").await {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!(source = %source.display(), error = %e, "outline probe failed");
                String::new()
            }
        }
    }

    async fn has_text(&self, source: &Path) -> bool {
        let args = vec!["--page=1".to_string(), source.display().to_string()];
        match run_tool(&self.djvutxt, &args, None).await {
            Ok(output) => !String::from_utf8_lossy(&output.stdout).trim().is_empty(),
            Err(_) => false,
        }
    }
}

/// Parse the INFO chunk of a page dump, e.g.
/// `INFO [10] DjVu 2550x3300, v24, 300 dpi, gamma=2.2`.
fn parse_info_line(dump: &str) -> Option<(u32, u32, u32)> {
    let line = dump.lines().find(|l| l.contains("INFO"))?;
    let mut size = None;
    let mut dpi = None;

    let tokens: Vec<&str> = line
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .collect();
    for (i, token) in tokens.iter().enumerate() {
        if size.is_none() {
            if let Some((w, h)) = token.split_once('x') {
                if let (Ok(w), Ok(h)) = (w.parse::<u32>(), h.parse::<u32>()) {
                    size = Some((w, h));
                }
            }
        }
        if *token == "dpi" && i > 0 {
            if let Ok(n) = tokens[i - 1].parse::<u32>() {
                dpi = Some(n);
            }
        }
    }

    let (w, h) = size?;
    Some((w, h, dpi.unwrap_or(DEFAULT_DPI)))
}
