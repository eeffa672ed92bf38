//! The two conversion pipelines.
//!
//! `viewing` is the staged one: a fast first page, a full-length skeleton,
//! a quick prefix, and a chunked parallel full conversion reconciled into
//! one final document. `export` is its simpler sibling: render everything,
//! assemble, deliver once.

pub mod export;
pub mod viewing;

pub use export::{convert_to_target, ConvertOptions, PageSet};
pub use viewing::{open_for_viewing, ViewingStarted};
