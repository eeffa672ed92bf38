//! The export pipeline: convert a whole source (or a page subset) into a
//! final PDF in one pass. No staging - callers get progress events and a
//! single terminal delivery.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Deserialize;

use crate::djvu::{parse_outline, OutlineNode};
use crate::events::JobPhase;
use crate::jobs::{JobHandle, JobKind};
use crate::pdf::{assemble, outline};
use crate::ViewerState;

/// Page subset of a conversion request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PageSet {
    #[default]
    All,
    /// Inclusive 1-based range.
    Range {
        from: u32,
        to: u32,
    },
    /// Explicit 1-based page numbers; duplicates are tolerated and dropped.
    Pages(Vec<u32>),
}

/// Options of a conversion request. Immutable once submitted.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConvertOptions {
    pub pages: PageSet,
    /// Target resolution = source resolution / divisor (0 and 1 both mean
    /// full resolution).
    pub resolution_divisor: u32,
    pub preserve_outline: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            pages: PageSet::All,
            resolution_divisor: 1,
            preserve_outline: true,
        }
    }
}

/// Convert `source` to a PDF at `output` (or a temp-area artifact when no
/// output path is given - the "return bytes" mode; callers read the file
/// and reclaim it with `cleanup_temp`).
pub async fn convert_to_target(
    state: &ViewerState,
    source: &Path,
    output: Option<&Path>,
    options: &ConvertOptions,
) -> Result<PathBuf> {
    let job = state.registry.begin(JobKind::Conversion, source);
    state.registry.start(job.id);
    tracing::info!(job_id = %job.id, source = %source.display(), "conversion job started");

    let out_path = match output {
        Some(path) => path.to_path_buf(),
        None => state.temp.artifact_path("pdf"),
    };

    match run_export(state, &job, source, &out_path, options).await {
        Ok(delivered) => {
            state.registry.remove(job.id);
            if !delivered {
                // cancelled before delivery; reclaim what we wrote
                if output.is_none() {
                    let _ = std::fs::remove_file(&out_path);
                }
                bail!("conversion job was cancelled");
            }
            Ok(out_path)
        }
        Err(e) => {
            tracing::error!(job_id = %job.id, error = %format!("{e:#}"), "conversion job failed");
            state.registry.publish_error(job.id, &format!("{e:#}"));
            state.registry.remove(job.id);
            Err(e)
        }
    }
}

async fn run_export(
    state: &ViewerState,
    job: &JobHandle,
    source: &Path,
    out_path: &Path,
    options: &ConvertOptions,
) -> Result<bool> {
    // independent probes, concurrently; only the page count is fatal
    let (page_count, dpi, outline_text) = tokio::join!(
        state.probe.page_count(source),
        state.probe.dpi(source),
        async {
            if options.preserve_outline {
                state.probe.outline_text(source).await
            } else {
                String::new()
            }
        },
    );
    let page_count = page_count.context("failed to read page count")?;
    let pages = resolve_pages(&options.pages, page_count)?;

    let workdir = state
        .temp
        .create_job_dir()
        .context("failed to create working directory")?;
    let outcome = render_and_assemble(
        state,
        job,
        source,
        out_path,
        &pages,
        dpi,
        &outline_text,
        options,
        &workdir,
    )
    .await;
    if let Err(e) = std::fs::remove_dir_all(&workdir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!(dir = %workdir.display(), error = %e, "workdir cleanup failed");
        }
    }
    outcome
}

#[allow(clippy::too_many_arguments)]
async fn render_and_assemble(
    state: &ViewerState,
    job: &JobHandle,
    source: &Path,
    out_path: &Path,
    pages: &[u32],
    dpi: u32,
    outline_text: &str,
    options: &ConvertOptions,
    workdir: &Path,
) -> Result<bool> {
    let divisor = options.resolution_divisor.max(1);
    let scale_percent = (100 / divisor).max(1);
    let target_dpi = (dpi / divisor).max(1);

    // one raster per page, all in flight at once
    let mut renders = FuturesUnordered::new();
    let mut image_paths = Vec::with_capacity(pages.len());
    for &page in pages {
        let out = workdir.join(format!("page-{page:05}.ppm"));
        image_paths.push(out.clone());
        let converter = state.converter.clone();
        let cancel = job.cancel.clone();
        let source = source.to_path_buf();
        renders.push(async move {
            converter
                .page_to_image(&source, &out, page, scale_percent, &cancel)
                .await
        });
    }

    let total = pages.len() as u32;
    let mut done = 0u32;
    while let Some(result) = renders.next().await {
        result.map_err(|e| anyhow!(e).context("page rendering failed"))?;
        done += 1;
        let percent = (done as u64 * 100 / total as u64) as u8;
        state
            .registry
            .publish_progress(job.id, JobPhase::Converting, done, total, percent);
    }

    let mut doc = assemble::assemble_from_images(&image_paths, target_dpi, state.config.jpeg_quality)
        .context("failed to assemble the output document")?;

    let nodes = remap_outline(parse_outline(outline_text), pages);
    if !nodes.is_empty() {
        state
            .registry
            .publish_progress(job.id, JobPhase::EmbeddingOutline, 0, 1, 0);
        if let Err(e) = outline::embed_outline(&mut doc, &nodes) {
            tracing::warn!(job_id = %job.id, error = %format!("{e:#}"), "outline embedding failed, delivering without it");
        }
        state
            .registry
            .publish_progress(job.id, JobPhase::EmbeddingOutline, 1, 1, 100);
    }

    doc.save(out_path)
        .with_context(|| format!("failed to write {}", out_path.display()))?;
    Ok(state.registry.publish_ready(job.id, out_path))
}

/// Expand, validate, and de-duplicate a page selection. Fails fast on an
/// empty or out-of-range selection.
fn resolve_pages(set: &PageSet, page_count: u32) -> Result<Vec<u32>> {
    match set {
        PageSet::All => Ok((1..=page_count).collect()),
        PageSet::Range { from, to } => {
            if *from < 1 || from > to || *to > page_count {
                bail!("page range {from}-{to} is invalid for a {page_count}-page document");
            }
            Ok((*from..=*to).collect())
        }
        PageSet::Pages(requested) => {
            let mut pages: Vec<u32> = requested.clone();
            pages.sort_unstable();
            pages.dedup();
            if pages.is_empty() {
                bail!("page selection is empty");
            }
            if pages[0] < 1 || *pages.last().unwrap() > page_count {
                bail!("page selection is out of range for a {page_count}-page document");
            }
            Ok(pages)
        }
    }
}

/// Rewrite outline targets from source page numbers to positions within the
/// exported subset. Nodes pointing at pages that were not exported keep
/// their children but lose the target.
fn remap_outline(nodes: Vec<OutlineNode>, pages: &[u32]) -> Vec<OutlineNode> {
    let position: HashMap<u32, u32> = pages
        .iter()
        .enumerate()
        .map(|(i, &page)| (page, i as u32 + 1))
        .collect();
    remap_nodes(nodes, &position)
}

fn remap_nodes(nodes: Vec<OutlineNode>, position: &HashMap<u32, u32>) -> Vec<OutlineNode> {
    nodes
        .into_iter()
        .map(|node| OutlineNode {
            page: node.page.and_then(|p| position.get(&p).copied()),
            children: remap_nodes(node.children, position),
            title: node.title,
        })
        .collect()
}
