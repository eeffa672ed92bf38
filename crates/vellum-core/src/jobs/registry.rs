//! The job registry: single authority for "is this job still current".
//!
//! Every pipeline stage publishes events through the registry, which checks
//! the job's state under its lock before each send. Staleness suppression
//! (a cancelled or superseded job's late result, or a quick-prefix result
//! arriving after the full conversion already finished) is therefore one
//! enforced invariant here instead of a pattern repeated across stages.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::events::{JobPhase, ViewerEvent};

use super::types::{JobId, JobKind, JobState};

struct JobEntry {
    kind: JobKind,
    source: PathBuf,
    state: JobState,
    cancel: CancellationToken,
    /// Set once the full sub-phase has completed. A quick-prefix result that
    /// arrives later must not be published over the full one.
    background_done: bool,
}

/// Handle returned by [`JobRegistry::begin`]; the pipeline threads the
/// cancellation token through every external-tool invocation.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub id: JobId,
    pub cancel: CancellationToken,
}

/// Tracks every in-flight job and owns the event stream.
///
/// The lock is a sync `RwLock` on purpose: each critical section is a map
/// touch plus an unbounded send, and the state check must be synchronous
/// with the publish so a cancellation cannot slip in between them.
#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<JobId, JobEntry>>>,
    events: mpsc::UnboundedSender<ViewerEvent>,
}

impl JobRegistry {
    /// Create a registry and the receiving end of its event stream.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ViewerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                jobs: Arc::new(RwLock::new(HashMap::new())),
                events,
            },
            rx,
        )
    }

    /// Register a new job.
    ///
    /// A viewing request supersedes a prior viewing job for the same source:
    /// the old job is cancelled here, under the same lock that inserts the
    /// new one, so two near-simultaneous requests cannot both think they are
    /// current.
    pub fn begin(&self, kind: JobKind, source: &Path) -> JobHandle {
        let mut jobs = self.jobs.write().unwrap();

        if kind == JobKind::Viewing {
            for (id, entry) in jobs.iter_mut() {
                if entry.kind == JobKind::Viewing
                    && entry.source == source
                    && !entry.state.is_terminal()
                {
                    tracing::info!(job_id = %id, "superseding viewing job");
                    entry.state = JobState::Cancelled;
                    entry.cancel.cancel();
                }
            }
        }

        let id = JobId::new();
        let cancel = CancellationToken::new();
        jobs.insert(
            id,
            JobEntry {
                kind,
                source: source.to_path_buf(),
                state: JobState::Pending,
                cancel: cancel.clone(),
                background_done: false,
            },
        );
        JobHandle { id, cancel }
    }

    /// Transition `Pending -> Running`.
    pub fn start(&self, id: JobId) {
        let mut jobs = self.jobs.write().unwrap();
        if let Some(entry) = jobs.get_mut(&id) {
            if entry.state == JobState::Pending {
                entry.state = JobState::Running;
            }
        }
    }

    /// Cancel a job. Advisory: marks the job cancelled and fires its token
    /// (killing any tracked external process); already-finished work is
    /// suppressed at publish time. Returns `false` for unknown or
    /// already-terminal jobs.
    pub fn cancel(&self, id: JobId) -> bool {
        let mut jobs = self.jobs.write().unwrap();
        match jobs.get_mut(&id) {
            Some(entry) if !entry.state.is_terminal() => {
                entry.state = JobState::Cancelled;
                entry.cancel.cancel();
                tracing::info!(job_id = %id, "job cancelled");
                true
            }
            _ => false,
        }
    }

    /// Whether the job is still running (not cancelled, superseded, or done).
    pub fn is_live(&self, id: JobId) -> bool {
        let jobs = self.jobs.read().unwrap();
        jobs.get(&id)
            .map(|e| e.state == JobState::Running)
            .unwrap_or(false)
    }

    /// Publish a progress event for a live job. Stale jobs are silently
    /// dropped; that is not an error.
    pub fn publish_progress(
        &self,
        id: JobId,
        phase: JobPhase,
        current: u32,
        total: u32,
        percent: u8,
    ) {
        let jobs = self.jobs.read().unwrap();
        if jobs.get(&id).map(|e| e.state) == Some(JobState::Running) {
            let _ = self.events.send(ViewerEvent::Progress {
                job_id: id,
                phase,
                current,
                total,
                percent,
            });
        }
    }

    /// Publish an interim (`partial: true`) ready event.
    ///
    /// Refused once the full sub-phase has completed for this job, or once
    /// the job is no longer live. Returns whether the event was delivered;
    /// on `false` the caller still owns the artifact and should reclaim it.
    pub fn publish_interim(&self, id: JobId, document_path: &Path) -> bool {
        let jobs = self.jobs.read().unwrap();
        match jobs.get(&id) {
            Some(entry) if entry.state == JobState::Running && !entry.background_done => {
                let _ = self.events.send(ViewerEvent::ViewingReady {
                    job_id: id,
                    document_path: document_path.to_path_buf(),
                    partial: true,
                });
                true
            }
            _ => false,
        }
    }

    /// Mark the full sub-phase complete, closing the door on late interim
    /// results. Returns `false` when the job is no longer live, in which
    /// case the pipeline should stop instead of merging.
    pub fn finish_background(&self, id: JobId) -> bool {
        let mut jobs = self.jobs.write().unwrap();
        match jobs.get_mut(&id) {
            Some(entry) if entry.state == JobState::Running => {
                entry.background_done = true;
                true
            }
            _ => false,
        }
    }

    /// Publish the final (`partial: false`) ready event and transition the
    /// job to `Ready`. Idempotent: a second terminal signal is ignored.
    /// Returns whether the event was delivered.
    pub fn publish_ready(&self, id: JobId, document_path: &Path) -> bool {
        let mut jobs = self.jobs.write().unwrap();
        match jobs.get_mut(&id) {
            Some(entry) if entry.state == JobState::Running => {
                entry.state = JobState::Ready;
                let _ = self.events.send(ViewerEvent::ViewingReady {
                    job_id: id,
                    document_path: document_path.to_path_buf(),
                    partial: false,
                });
                true
            }
            _ => false,
        }
    }

    /// Publish a terminal error event and transition the job to `Error`.
    /// Ignored for cancelled, superseded, or already-terminal jobs.
    pub fn publish_error(&self, id: JobId, error: &str) {
        let mut jobs = self.jobs.write().unwrap();
        if let Some(entry) = jobs.get_mut(&id) {
            if !entry.state.is_terminal() {
                entry.state = JobState::Error;
                let _ = self.events.send(ViewerEvent::ViewingError {
                    job_id: id,
                    error: error.to_string(),
                });
            }
        }
    }

    /// Drop a job whose terminal event has been delivered and whose
    /// temporary artifacts are reclaimed.
    pub fn remove(&self, id: JobId) {
        self.jobs.write().unwrap().remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ViewerEvent;
    use std::path::PathBuf;

    fn source() -> PathBuf {
        PathBuf::from("/books/a.djvu")
    }

    #[test]
    fn test_terminal_ready_is_idempotent() {
        let (registry, mut rx) = JobRegistry::new();
        let job = registry.begin(JobKind::Viewing, &source());
        registry.start(job.id);

        assert!(registry.publish_ready(job.id, Path::new("/tmp/a.pdf")));
        assert!(!registry.publish_ready(job.id, Path::new("/tmp/b.pdf")));
        registry.publish_error(job.id, "late failure");

        let event = rx.try_recv().unwrap();
        assert!(matches!(
            event,
            ViewerEvent::ViewingReady { partial: false, .. }
        ));
        assert!(rx.try_recv().is_err(), "duplicate terminal signals leaked");
    }

    #[test]
    fn test_cancel_after_terminal_is_noop() {
        let (registry, _rx) = JobRegistry::new();
        let job = registry.begin(JobKind::Viewing, &source());
        registry.start(job.id);
        registry.publish_ready(job.id, Path::new("/tmp/a.pdf"));

        assert!(!registry.cancel(job.id));
    }

    #[test]
    fn test_cancel_suppresses_later_events() {
        let (registry, mut rx) = JobRegistry::new();
        let job = registry.begin(JobKind::Viewing, &source());
        registry.start(job.id);

        assert!(registry.cancel(job.id));
        assert!(job.cancel.is_cancelled());

        registry.publish_progress(job.id, JobPhase::Loading, 1, 10, 10);
        assert!(!registry.publish_interim(job.id, Path::new("/tmp/a.pdf")));
        assert!(!registry.publish_ready(job.id, Path::new("/tmp/a.pdf")));
        registry.publish_error(job.id, "boom");

        assert!(rx.try_recv().is_err(), "cancelled job leaked events");
    }

    #[test]
    fn test_new_viewing_job_supersedes_prior_for_same_source() {
        let (registry, _rx) = JobRegistry::new();
        let first = registry.begin(JobKind::Viewing, &source());
        registry.start(first.id);

        let second = registry.begin(JobKind::Viewing, &source());
        registry.start(second.id);

        assert!(first.cancel.is_cancelled());
        assert!(!registry.is_live(first.id));
        assert!(registry.is_live(second.id));
        // terminal already, so an explicit cancel is a no-op
        assert!(!registry.cancel(first.id));
    }

    #[test]
    fn test_conversion_job_does_not_supersede_viewing() {
        let (registry, _rx) = JobRegistry::new();
        let viewing = registry.begin(JobKind::Viewing, &source());
        registry.start(viewing.id);

        let export = registry.begin(JobKind::Conversion, &source());
        registry.start(export.id);

        assert!(registry.is_live(viewing.id));
        assert!(registry.is_live(export.id));
    }

    #[test]
    fn test_interim_refused_after_background_done() {
        let (registry, mut rx) = JobRegistry::new();
        let job = registry.begin(JobKind::Viewing, &source());
        registry.start(job.id);

        assert!(registry.publish_interim(job.id, Path::new("/tmp/skel.pdf")));
        assert!(registry.finish_background(job.id));
        // the quick prefix lost the race; its result must be dropped
        assert!(!registry.publish_interim(job.id, Path::new("/tmp/quick.pdf")));
        assert!(registry.publish_ready(job.id, Path::new("/tmp/final.pdf")));

        let first = rx.try_recv().unwrap();
        assert!(matches!(
            first,
            ViewerEvent::ViewingReady { partial: true, .. }
        ));
        let second = rx.try_recv().unwrap();
        assert!(matches!(
            second,
            ViewerEvent::ViewingReady { partial: false, .. }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_removed_job_rejects_everything() {
        let (registry, mut rx) = JobRegistry::new();
        let job = registry.begin(JobKind::Viewing, &source());
        registry.start(job.id);
        registry.publish_ready(job.id, Path::new("/tmp/a.pdf"));
        registry.remove(job.id);

        assert!(!registry.cancel(job.id));
        assert!(!registry.is_live(job.id));
        assert!(!registry.publish_interim(job.id, Path::new("/tmp/b.pdf")));
        let _ = rx.try_recv(); // the one ready event from above
        assert!(rx.try_recv().is_err());
    }
}
