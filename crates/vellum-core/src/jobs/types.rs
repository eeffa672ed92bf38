//! Job identifiers and lifecycle states.

use serde::Serialize;
use uuid::Uuid;

/// Identifier for one tracked unit of conversion work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// What a job was started for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Viewing,
    Conversion,
}

/// Job lifecycle: `Pending -> Running -> {Ready | Error | Cancelled}`.
///
/// The three right-hand states are terminal; re-signalling a terminal state
/// is ignored by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Ready,
    Error,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Ready | JobState::Error | JobState::Cancelled)
    }
}
