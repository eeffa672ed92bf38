//! Job-scoped events pushed to the consumer.
//!
//! Every event carries the id of the job it belongs to, so several viewing
//! jobs can coexist on one stream without clobbering each other. The stream
//! is a single unbounded channel owned by the [`JobRegistry`]; consumers
//! normally wrap the receiver with [`stream`].
//!
//! [`JobRegistry`]: crate::jobs::JobRegistry

use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::jobs::JobId;

/// Phase tag attached to progress events.
///
/// Within one phase the reported percentage never decreases, but the phase
/// itself may regress to a lower displayed percentage (converting 0-90,
/// then embedding-outline restarting near 0). Consumers render it that way
/// on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobPhase {
    Converting,
    EmbeddingOutline,
    Loading,
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Converting => write!(f, "converting"),
            JobPhase::EmbeddingOutline => write!(f, "embedding-outline"),
            JobPhase::Loading => write!(f, "loading"),
        }
    }
}

/// Event pushed to the surrounding application.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ViewerEvent {
    /// Conversion progress for one phase of a job.
    Progress {
        job_id: JobId,
        phase: JobPhase,
        current: u32,
        total: u32,
        percent: u8,
    },
    /// A usable document is available. `partial` distinguishes an interim
    /// (skeleton/quick) delivery from the final one; exactly one
    /// `partial: false` event (or one error) terminates a job.
    ViewingReady {
        job_id: JobId,
        document_path: PathBuf,
        partial: bool,
    },
    /// Terminal failure for the job it names.
    ViewingError { job_id: JobId, error: String },
}

impl ViewerEvent {
    /// The job this event belongs to.
    pub fn job_id(&self) -> JobId {
        match self {
            ViewerEvent::Progress { job_id, .. }
            | ViewerEvent::ViewingReady { job_id, .. }
            | ViewerEvent::ViewingError { job_id, .. } => *job_id,
        }
    }

    /// Whether this event ends its job.
    pub fn is_terminal(&self) -> bool {
        match self {
            ViewerEvent::Progress { .. } => false,
            ViewerEvent::ViewingReady { partial, .. } => !partial,
            ViewerEvent::ViewingError { .. } => true,
        }
    }
}

/// Wrap the raw event receiver as a `Stream` for `while let`-style consumers.
pub fn stream(rx: mpsc::UnboundedReceiver<ViewerEvent>) -> UnboundedReceiverStream<ViewerEvent> {
    UnboundedReceiverStream::new(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_event_serialization_shape() {
        let id = JobId::from(Uuid::nil());
        let event = ViewerEvent::Progress {
            job_id: id,
            phase: JobPhase::EmbeddingOutline,
            current: 1,
            total: 2,
            percent: 50,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["phase"], "embedding-outline");
        assert_eq!(json["jobId"], Uuid::nil().to_string());

        let ready = ViewerEvent::ViewingReady {
            job_id: id,
            document_path: "/tmp/x.pdf".into(),
            partial: true,
        };
        let json = serde_json::to_value(&ready).unwrap();
        assert_eq!(json["type"], "viewingReady");
        assert_eq!(json["partial"], true);
    }

    #[test]
    fn test_terminal_classification() {
        let id = JobId::from(Uuid::nil());
        let interim = ViewerEvent::ViewingReady {
            job_id: id,
            document_path: "/tmp/x.pdf".into(),
            partial: true,
        };
        let done = ViewerEvent::ViewingReady {
            job_id: id,
            document_path: "/tmp/x.pdf".into(),
            partial: false,
        };
        assert!(!interim.is_terminal());
        assert!(done.is_terminal());
        assert!(ViewerEvent::ViewingError {
            job_id: id,
            error: "boom".into()
        }
        .is_terminal());
    }
}
