//! Vellum core - the staged conversion pipeline behind the viewer.
//!
//! This crate contains everything the GUI shell talks to:
//! - External tool adapter around the djvulibre binaries (`djvu::tool`)
//! - Metadata probes and outline parsing (`djvu`)
//! - PDF construction: skeleton, merge, outline embedding, image assembly (`pdf`)
//! - Job registry with cancellation and staleness suppression (`jobs`)
//! - Staged viewing pipeline and one-shot export pipeline (`pipeline`)
//! - The command surface and event stream (`commands`, `events`)
//!
//! The surrounding application exchanges only commands, events, page
//! counts, and file paths with this crate; rendering and UI concerns stay
//! outside.

pub mod commands;
pub mod config;
pub mod djvu;
pub mod events;
pub mod jobs;
pub mod pdf;
pub mod pipeline;
pub mod temp;

use std::sync::Arc;

use tokio::sync::mpsc;

pub use config::Config;
pub use events::{JobPhase, ViewerEvent};
pub use jobs::{JobId, JobRegistry};

use djvu::{DjvuTool, PageConverter, SourceProbe};
use temp::TempArea;

/// Shared state behind every command.
#[derive(Clone)]
pub struct ViewerState {
    pub config: Config,
    pub registry: JobRegistry,
    pub temp: TempArea,
    pub converter: Arc<dyn PageConverter>,
    pub probe: Arc<dyn SourceProbe>,
}

impl ViewerState {
    /// Create the state and the receiving end of its event stream.
    pub fn new(config: Config) -> anyhow::Result<(Self, mpsc::UnboundedReceiver<ViewerEvent>)> {
        let tool = Arc::new(DjvuTool::new(&config));
        Self::with_tools(config, tool.clone(), tool)
    }

    /// Create the state with explicit tool implementations. This is the
    /// seam the tests (and any embedder with its own converter) use.
    pub fn with_tools(
        config: Config,
        converter: Arc<dyn PageConverter>,
        probe: Arc<dyn SourceProbe>,
    ) -> anyhow::Result<(Self, mpsc::UnboundedReceiver<ViewerEvent>)> {
        let temp = TempArea::new(config.temp_root.clone())?;
        let (registry, events) = JobRegistry::new();
        Ok((
            Self {
                config,
                registry,
                temp,
                converter,
                probe,
            },
            events,
        ))
    }
}
