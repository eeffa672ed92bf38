//! Source-format handling: the external tool adapter, metadata probes, and
//! the outline parser.

pub mod outline;
pub mod probe;
pub mod tool;

pub use outline::{parse_outline, OutlineNode};
pub use probe::{probe_source, SourceInfo, SourceProbe, DEFAULT_DPI};
pub use tool::{DjvuTool, PageConverter, PageSelector, ToolError};
