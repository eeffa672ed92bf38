//! Job tracking for conversion and viewing requests.
//!
//! One job is registered per request. The registry is a multi-job map: a new
//! viewing request can arrive while a prior one's background phase is still
//! unwinding, and both must be tracked until their artifacts are reclaimed.

mod registry;
mod types;

pub use registry::{JobHandle, JobRegistry};
pub use types::{JobId, JobKind, JobState};
