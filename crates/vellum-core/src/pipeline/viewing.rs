//! The staged viewing pipeline.
//!
//! ```text
//! open_for_viewing(path)
//!     │
//!     ├─ 1. probe page count                 (failure is terminal)
//!     ├─ 2. convert page 1                   (failure is terminal)
//!     ├─ 3. one page?  -> outline -> final ready, done
//!     ├─ 4. skeleton = page 1 + filler       -> interim ready
//!     │      (returns to the caller here)
//!     └─ 5. background task
//!            ├─ quick prefix (pages 1..=3)   -> interim ready, unless
//!            │                                  the full phase already won
//!            ├─ full conversion, chunked, parallel, progress per chunk
//!            └─ outline extraction, awaited at merge
//!                   │
//!            6. merge chunks -> embed outline -> final ready
//!            7. reclaim the job's temp files on every exit path
//! ```
//!
//! A multi-hundred-page source takes a long time to convert; the staging
//! gives the viewer correct pagination instantly (skeleton), real content
//! for the first pages quickly (quick prefix), and the full document when
//! it is done - without ever publishing a stale or out-of-order result
//! (the registry enforces that).

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use lopdf::Document;
use tokio::task::JoinHandle;

use crate::djvu::{parse_outline, OutlineNode, PageSelector};
use crate::events::JobPhase;
use crate::jobs::{JobHandle, JobKind};
use crate::pdf::{merge, outline, skeleton};
use crate::ViewerState;

/// What `open_for_viewing` hands back once the first usable document
/// exists. For multi-page sources the background phase keeps running after
/// this returns.
#[derive(Debug, Clone)]
pub struct ViewingStarted {
    pub job_id: crate::jobs::JobId,
    pub document_path: PathBuf,
    pub page_count: u32,
}

/// Open a source document for staged viewing.
///
/// Returns as soon as an initial document is available: the finished
/// document for single-page sources, the skeleton otherwise. Further
/// deliveries arrive on the event stream under the returned job id.
pub async fn open_for_viewing(state: &ViewerState, source: &Path) -> Result<ViewingStarted> {
    let job = state.registry.begin(JobKind::Viewing, source);
    state.registry.start(job.id);
    tracing::info!(job_id = %job.id, source = %source.display(), "viewing job started");

    // Step 1: page count. Nothing can proceed without it.
    let page_count = match state.probe.page_count(source).await {
        Ok(n) => n,
        Err(e) => return fail(state, &job, None, e.context("failed to read page count")),
    };

    let workdir = match state.temp.create_job_dir() {
        Ok(dir) => dir,
        Err(e) => {
            return fail(
                state,
                &job,
                None,
                anyhow!(e).context("failed to create working directory"),
            )
        }
    };

    // Step 2: fast path - page 1 only.
    let page_one = workdir.join("page-1.pdf");
    if let Err(e) = state
        .converter
        .pages_to_pdf(source, &page_one, &PageSelector::Range(1, 1), &job.cancel)
        .await
    {
        return fail(
            state,
            &job,
            Some(&workdir),
            anyhow!(e).context("failed to convert the first page"),
        );
    }

    // Outline extraction is independent of page conversion; run it from
    // here and await it only when a document is about to be delivered.
    let outline_task = spawn_outline_task(state, source);

    // Step 3: single-page sources skip the skeleton entirely.
    if page_count == 1 {
        let final_path = state.temp.artifact_path("pdf");
        let nodes = outline_task.await.unwrap_or_default();
        if let Err(e) = deliver_single_page(&page_one, &nodes, &final_path) {
            return fail(state, &job, Some(&workdir), e);
        }
        let delivered = state.registry.publish_ready(job.id, &final_path);
        if !delivered {
            let _ = std::fs::remove_file(&final_path);
        }
        remove_dir_quiet(&workdir);
        state.registry.remove(job.id);
        return Ok(ViewingStarted {
            job_id: job.id,
            document_path: final_path,
            page_count: 1,
        });
    }

    // Step 4: skeleton - correct page count immediately.
    let skeleton_path = state.temp.artifact_path("pdf");
    if let Err(e) = skeleton::pad_to_page_count(&page_one, page_count, &skeleton_path) {
        return fail(
            state,
            &job,
            Some(&workdir),
            e.context("failed to build the skeleton document"),
        );
    }
    // the page-1 content now lives inside the skeleton
    let _ = std::fs::remove_file(&page_one);
    if !state.registry.publish_interim(job.id, &skeleton_path) {
        // cancelled in the meantime; nothing was delivered
        let _ = std::fs::remove_file(&skeleton_path);
        remove_dir_quiet(&workdir);
        state.registry.remove(job.id);
        return Err(anyhow!("viewing job was cancelled"));
    }

    // Step 5: the background phase. `open_for_viewing` itself is done.
    let bg_state = state.clone();
    let bg_job = job.clone();
    let bg_source = source.to_path_buf();
    tokio::spawn(async move {
        run_background(&bg_state, &bg_job, &bg_source, page_count, &workdir, outline_task).await;
    });

    Ok(ViewingStarted {
        job_id: job.id,
        document_path: skeleton_path,
        page_count,
    })
}

/// Terminal failure during the synchronous steps: publish, reclaim, report.
fn fail(
    state: &ViewerState,
    job: &JobHandle,
    workdir: Option<&Path>,
    error: anyhow::Error,
) -> Result<ViewingStarted> {
    tracing::error!(job_id = %job.id, error = %format!("{error:#}"), "viewing job failed");
    state.registry.publish_error(job.id, &format!("{error:#}"));
    if let Some(dir) = workdir {
        remove_dir_quiet(dir);
    }
    state.registry.remove(job.id);
    Err(error)
}

fn spawn_outline_task(state: &ViewerState, source: &Path) -> JoinHandle<Vec<OutlineNode>> {
    let probe = state.probe.clone();
    let source = source.to_path_buf();
    tokio::spawn(async move {
        let text = probe.outline_text(&source).await;
        parse_outline(&text)
    })
}

/// Single-page delivery: best-effort outline embedding, falling back to
/// the converted page as-is. An outline failure degrades the result, it
/// does not fail the job.
fn deliver_single_page(page_one: &Path, nodes: &[OutlineNode], out: &Path) -> Result<()> {
    if !nodes.is_empty() {
        let embedded = Document::load(page_one)
            .context("failed to reload the converted page")
            .and_then(|mut doc| {
                outline::embed_outline(&mut doc, nodes)?;
                doc.save(out).context("failed to write the final document")?;
                Ok(())
            });
        match embedded {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "outline embedding failed, delivering without it");
            }
        }
    }
    std::fs::rename(page_one, out).context("failed to move the final document into place")?;
    Ok(())
}

/// Steps 5-7, run as a detached task.
async fn run_background(
    state: &ViewerState,
    job: &JobHandle,
    source: &Path,
    page_count: u32,
    workdir: &Path,
    outline_task: JoinHandle<Vec<OutlineNode>>,
) {
    let quick = tokio::spawn(quick_prefix(
        state.clone(),
        job.clone(),
        source.to_path_buf(),
        page_count,
        workdir.to_path_buf(),
    ));

    let outcome = full_and_merge(state, job, source, page_count, workdir, outline_task).await;
    if let Err(e) = &outcome {
        tracing::error!(job_id = %job.id, error = %format!("{e:#}"), "background conversion failed");
        state.registry.publish_error(job.id, &format!("{e:#}"));
    }

    // let the quick sub-phase finish; it reclaims its own artifact when the
    // registry refuses it, so waiting here keeps cleanup complete
    let _ = quick.await;
    remove_dir_quiet(workdir);
    state.registry.remove(job.id);
}

/// 5a: convert the first few pages and publish an intermediate document,
/// unless the full sub-phase already completed. Failures here are
/// swallowed deliberately - the full sub-phase owns the terminal outcome.
async fn quick_prefix(
    state: ViewerState,
    job: JobHandle,
    source: PathBuf,
    page_count: u32,
    workdir: PathBuf,
) {
    let quick_end = state.config.quick_pages.clamp(1, page_count);
    let raw = workdir.join("quick.pdf");
    if let Err(e) = state
        .converter
        .pages_to_pdf(&source, &raw, &PageSelector::Range(1, quick_end), &job.cancel)
        .await
    {
        tracing::debug!(job_id = %job.id, error = %e, "quick prefix conversion failed");
        return;
    }

    let padded = state.temp.artifact_path("pdf");
    if let Err(e) = skeleton::pad_to_page_count(&raw, page_count, &padded) {
        tracing::debug!(job_id = %job.id, error = %format!("{e:#}"), "quick prefix padding failed");
        return;
    }
    if state.registry.publish_interim(job.id, &padded) {
        tracing::debug!(job_id = %job.id, pages = quick_end, "quick prefix delivered");
    } else {
        // the full conversion won the race (or the job is gone)
        let _ = std::fs::remove_file(&padded);
    }
}

/// 5b + 6: chunked parallel conversion, then merge and final delivery.
async fn full_and_merge(
    state: &ViewerState,
    job: &JobHandle,
    source: &Path,
    page_count: u32,
    workdir: &Path,
    outline_task: JoinHandle<Vec<OutlineNode>>,
) -> Result<()> {
    let chunk_paths = convert_chunks(state, job, source, page_count, workdir).await?;

    // From this point the quick sub-phase may no longer publish. A refusal
    // means the job is cancelled or superseded: stop without delivering.
    if !state.registry.finish_background(job.id) {
        return Ok(());
    }

    let nodes = outline_task.await.unwrap_or_default();
    let mut doc = merge::concat_files(&chunk_paths).context("failed to merge converted chunks")?;
    if !nodes.is_empty() {
        if let Err(e) = outline::embed_outline(&mut doc, &nodes) {
            tracing::warn!(job_id = %job.id, error = %format!("{e:#}"), "outline embedding failed, delivering without it");
        }
    }

    let final_path = state.temp.artifact_path("pdf");
    doc.save(&final_path)
        .context("failed to write the final document")?;

    if !state.registry.publish_ready(job.id, &final_path) {
        let _ = std::fs::remove_file(&final_path);
    }
    Ok(())
}

/// Convert all pages as concurrent per-chunk tool invocations; first
/// failure fails the phase (a document with a gap in page order is worse
/// than an explicit error).
async fn convert_chunks(
    state: &ViewerState,
    job: &JobHandle,
    source: &Path,
    page_count: u32,
    workdir: &Path,
) -> Result<Vec<PathBuf>> {
    let chunk_size = state.config.chunk_size.max(1);
    let mut chunk_paths = Vec::new();
    let mut conversions = FuturesUnordered::new();

    let mut start = 1u32;
    let mut index = 0usize;
    while start <= page_count {
        let end = (start + chunk_size - 1).min(page_count);
        let out = workdir.join(format!("chunk-{index:04}.pdf"));
        chunk_paths.push(out.clone());

        let converter = state.converter.clone();
        let cancel = job.cancel.clone();
        let source = source.to_path_buf();
        conversions.push(async move {
            converter
                .pages_to_pdf(&source, &out, &PageSelector::Range(start, end), &cancel)
                .await
                .map(|()| end - start + 1)
        });

        start = end + 1;
        index += 1;
    }

    let mut converted_pages = 0u32;
    while let Some(result) = conversions.next().await {
        let pages = result.map_err(|e| anyhow!(e).context("page conversion failed"))?;
        converted_pages += pages;
        // capped below 100 until the merge step finishes
        let percent = (converted_pages as u64 * 100 / page_count as u64).min(99) as u8;
        state.registry.publish_progress(
            job.id,
            JobPhase::Loading,
            converted_pages,
            page_count,
            percent,
        );
    }
    Ok(chunk_paths)
}

fn remove_dir_quiet(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!(dir = %dir.display(), error = %e, "workdir cleanup failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use lopdf::Document;

    use super::*;
    use crate::events::ViewerEvent;
    use crate::pipeline::harness::{
        collect_until_terminal, scripted_state, wait_for_workdir_cleanup, ScriptedTool,
    };

    fn partial_ready_count(events: &[ViewerEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, ViewerEvent::ViewingReady { partial: true, .. }))
            .count()
    }

    fn assert_progress_monotonic(events: &[ViewerEvent]) {
        let mut last: HashMap<JobPhase, u8> = HashMap::new();
        for event in events {
            if let ViewerEvent::Progress { phase, percent, .. } = event {
                let previous = last.insert(*phase, *percent).unwrap_or(0);
                assert!(
                    *percent >= previous,
                    "percent regressed within {phase}: {previous} -> {percent}"
                );
            }
        }
    }

    #[tokio::test]
    async fn test_multipage_source_delivers_skeleton_then_final() {
        let (state, mut events, _tool, _guard) = scripted_state(ScriptedTool::new(10), 4);

        let started = open_for_viewing(&state, Path::new("/books/scan.djvu"))
            .await
            .unwrap();
        assert_eq!(started.page_count, 10);

        // the skeleton is usable before any background work finishes and
        // already has the full page count
        let skeleton = Document::load(&started.document_path).unwrap();
        assert_eq!(skeleton.get_pages().len(), 10);

        let collected = collect_until_terminal(&mut events, started.job_id).await;

        let first = &collected[0];
        assert!(
            matches!(first, ViewerEvent::ViewingReady { partial: true, .. }),
            "expected the skeleton delivery first, got {first:?}"
        );
        // skeleton, optionally the quick prefix
        assert!((1..=2).contains(&partial_ready_count(&collected)));
        assert_progress_monotonic(&collected);

        let last = collected.last().unwrap();
        let final_path = match last {
            ViewerEvent::ViewingReady {
                document_path,
                partial: false,
                ..
            } => document_path.clone(),
            other => panic!("expected a final ready event, got {other:?}"),
        };
        let final_doc = Document::load(&final_path).unwrap();
        assert_eq!(final_doc.get_pages().len(), 10);
        assert!(final_doc
            .extract_text(&[7])
            .unwrap_or_default()
            .contains("Page 7"));

        wait_for_workdir_cleanup(state.temp.root()).await;
    }

    #[tokio::test]
    async fn test_single_page_source_skips_the_skeleton() {
        let (state, mut events, tool, _guard) = scripted_state(ScriptedTool::new(1), 4);

        let started = open_for_viewing(&state, Path::new("/books/leaflet.djvu"))
            .await
            .unwrap();
        assert_eq!(started.page_count, 1);

        let collected = collect_until_terminal(&mut events, started.job_id).await;
        assert_eq!(collected.len(), 1);
        assert!(matches!(
            collected[0],
            ViewerEvent::ViewingReady { partial: false, .. }
        ));

        // only the fast path ran: one conversion call, page 1 only
        let calls = tool.convert_calls.lock().unwrap();
        assert_eq!(calls.as_slice(), &[PageSelector::Range(1, 1)]);
        drop(calls);

        assert_eq!(Document::load(&started.document_path).unwrap().get_pages().len(), 1);
        wait_for_workdir_cleanup(state.temp.root()).await;

        // already terminal, so cancel is a no-op
        assert!(!state.registry.cancel(started.job_id));
    }

    #[tokio::test]
    async fn test_quick_result_after_full_completion_is_dropped() {
        let mut tool = ScriptedTool::new(10);
        // quick prefix (pages 1-3) held back until the single full chunk
        // (pages 1-10) has long finished
        tool.delays
            .insert((1, 3), Duration::from_millis(300));
        let (state, mut events, _tool, _guard) = scripted_state(tool, 10);

        let started = open_for_viewing(&state, Path::new("/books/scan.djvu"))
            .await
            .unwrap();
        let collected = collect_until_terminal(&mut events, started.job_id).await;

        // the quick prefix lost the race: only the skeleton was interim
        assert_eq!(partial_ready_count(&collected), 1);
        assert!(matches!(
            collected.last().unwrap(),
            ViewerEvent::ViewingReady { partial: false, .. }
        ));

        // the background task waits out the quick sub-phase before
        // reclaiming, so after cleanup only delivered artifacts remain
        wait_for_workdir_cleanup(state.temp.root()).await;
        let remaining = std::fs::read_dir(state.temp.root())
            .unwrap()
            .filter_map(Result::ok)
            .count();
        assert_eq!(remaining, 2, "expected skeleton + final only");
    }

    #[tokio::test]
    async fn test_chunk_failure_fails_the_whole_background_phase() {
        let mut tool = ScriptedTool::new(10);
        tool.failing_pages = vec![6];
        let (state, mut events, _tool, _guard) = scripted_state(tool, 4);

        let started = open_for_viewing(&state, Path::new("/books/scan.djvu"))
            .await
            .unwrap();
        let collected = collect_until_terminal(&mut events, started.job_id).await;

        assert!(matches!(
            collected.last().unwrap(),
            ViewerEvent::ViewingError { .. }
        ));
        assert!(!collected
            .iter()
            .any(|e| matches!(e, ViewerEvent::ViewingReady { partial: false, .. })));

        // the delivered skeleton stays (the caller owns it), chunk outputs go
        assert!(started.document_path.exists());
        wait_for_workdir_cleanup(state.temp.root()).await;
    }

    #[tokio::test]
    async fn test_cancel_runs_cleanup_and_suppresses_events() {
        let mut tool = ScriptedTool::new(10);
        for (from, to) in [(1, 3), (1, 4), (5, 8), (9, 10)] {
            tool.delays.insert((from, to), Duration::from_millis(200));
        }
        let (state, mut events, _tool, _guard) = scripted_state(tool, 4);

        let started = open_for_viewing(&state, Path::new("/books/scan.djvu"))
            .await
            .unwrap();
        // skeleton delivery
        let first = events.recv().await.unwrap();
        assert!(matches!(
            first,
            ViewerEvent::ViewingReady { partial: true, .. }
        ));

        assert!(state.registry.cancel(started.job_id));

        wait_for_workdir_cleanup(state.temp.root()).await;
        assert!(started.document_path.exists(), "delivered skeleton reclaimed");

        // cancellation suppresses everything after it
        let quiet =
            tokio::time::timeout(Duration::from_millis(400), events.recv()).await;
        assert!(quiet.is_err(), "cancelled job still emitted {quiet:?}");
    }

    #[tokio::test]
    async fn test_bad_page_count_is_terminal_immediately() {
        let (state, mut events, tool, _guard) = scripted_state(ScriptedTool::new(0), 4);

        let result = open_for_viewing(&state, Path::new("/books/corrupt.djvu")).await;
        assert!(result.is_err());

        let event = events.recv().await.unwrap();
        assert!(matches!(event, ViewerEvent::ViewingError { .. }));
        assert!(tool.convert_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_final_document_carries_the_outline() {
        let mut tool = ScriptedTool::new(4);
        tool.outline_text =
            "(bookmarks (\"Chapter 1\" \"#1\") (\"Chapter 2\" \"#3\"))".to_string();
        let (state, mut events, _tool, _guard) = scripted_state(tool, 4);

        let started = open_for_viewing(&state, Path::new("/books/scan.djvu"))
            .await
            .unwrap();
        let collected = collect_until_terminal(&mut events, started.job_id).await;

        let final_path = match collected.last().unwrap() {
            ViewerEvent::ViewingReady {
                document_path,
                partial: false,
                ..
            } => document_path.clone(),
            other => panic!("expected final ready, got {other:?}"),
        };
        let doc = Document::load(&final_path).unwrap();
        let catalog_id = doc.trailer.get(b"Root").unwrap().as_reference().unwrap();
        let catalog = doc.get_object(catalog_id).unwrap().as_dict().unwrap();
        assert!(catalog.get(b"Outlines").is_ok());
        wait_for_workdir_cleanup(state.temp.root()).await;
    }
}
