//! The command surface exposed to the surrounding application.
//!
//! Request/response pairs; everything asynchronous about a job arrives on
//! the event stream instead. Errors serialize as
//! `{"code": "...", "message": "..."}` with a snake_case code for the
//! frontend to match on.

use std::path::Path;

use serde::Serialize;

use crate::djvu::{parse_outline, probe_source};
use crate::jobs::JobId;
use crate::pipeline::{self, ConvertOptions};
use crate::ViewerState;

/// Errors returned by commands.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum CommandError {
    SourceNotFound { message: String },
    InvalidRequest { message: String },
    ConversionFailed { message: String },
    CleanupRefused { message: String },
}

impl CommandError {
    pub fn source_not_found(path: &str) -> Self {
        Self::SourceNotFound {
            message: format!("Source document not found: {path}"),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SourceNotFound { message }
            | Self::InvalidRequest { message }
            | Self::ConversionFailed { message }
            | Self::CleanupRefused { message } => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for CommandError {}

impl From<anyhow::Error> for CommandError {
    fn from(err: anyhow::Error) -> Self {
        Self::ConversionFailed {
            message: format!("{err:#}"),
        }
    }
}

/// Result type alias for commands
pub type CommandResult<T> = Result<T, CommandError>;

/// Response of [`open_for_viewing`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenForViewingResponse {
    pub job_id: JobId,
    pub initial_document_path: String,
    pub page_count: u32,
}

/// Start staged viewing of a source document.
///
/// Returns once an initial document exists (the final one for single-page
/// sources, the skeleton otherwise); interim and final deliveries follow
/// on the event stream under the returned job id.
pub async fn open_for_viewing(
    state: &ViewerState,
    source_path: &str,
) -> CommandResult<OpenForViewingResponse> {
    let source = Path::new(source_path);
    if !source.is_file() {
        return Err(CommandError::source_not_found(source_path));
    }

    let started = pipeline::open_for_viewing(state, source).await?;
    Ok(OpenForViewingResponse {
        job_id: started.job_id,
        initial_document_path: started.document_path.display().to_string(),
        page_count: started.page_count,
    })
}

/// Response of [`convert_to_target`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertResponse {
    pub output_path: String,
}

/// Convert a source document to a PDF. Blocks until the conversion is done;
/// progress arrives on the event stream meanwhile. With no `output_path`
/// the result is written into the temp area and the caller owns reclaiming
/// it via [`cleanup_temp`].
pub async fn convert_to_target(
    state: &ViewerState,
    source_path: &str,
    output_path: Option<&str>,
    options: ConvertOptions,
) -> CommandResult<ConvertResponse> {
    let source = Path::new(source_path);
    if !source.is_file() {
        return Err(CommandError::source_not_found(source_path));
    }

    let output = output_path.map(Path::new);
    let written = pipeline::convert_to_target(state, source, output, &options).await?;
    Ok(ConvertResponse {
        output_path: written.display().to_string(),
    })
}

/// Response of [`cancel`].
#[derive(Debug, Clone, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// Cancel a job. Advisory; a no-op (`cancelled: false`) for unknown,
/// malformed, or already-terminal job ids.
pub fn cancel(state: &ViewerState, job_id: &str) -> CancelResponse {
    let cancelled = match job_id.parse::<JobId>() {
        Ok(id) => state.registry.cancel(id),
        Err(_) => false,
    };
    CancelResponse { cancelled }
}

/// Source metadata beyond the headline numbers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMetadata {
    /// First-page geometry in source pixels; zero when unknown.
    pub page_width: u32,
    pub page_height: u32,
    pub file_size_bytes: u64,
}

/// Response of [`get_info`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfoResponse {
    pub page_count: u32,
    pub source_dpi: u32,
    pub has_outline: bool,
    pub has_text: bool,
    pub metadata: SourceMetadata,
}

/// Probe a source document without registering a job.
pub async fn get_info(state: &ViewerState, source_path: &str) -> CommandResult<SourceInfoResponse> {
    let source = Path::new(source_path);
    if !source.is_file() {
        return Err(CommandError::source_not_found(source_path));
    }

    let info = probe_source(state.probe.as_ref(), source).await?;
    let file_size_bytes = std::fs::metadata(source).map(|m| m.len()).unwrap_or(0);

    Ok(SourceInfoResponse {
        page_count: info.page_count,
        source_dpi: info.dpi,
        has_outline: !parse_outline(&info.outline_text).is_empty(),
        has_text: info.has_text,
        metadata: SourceMetadata {
            page_width: info.page_width,
            page_height: info.page_height,
            file_size_bytes,
        },
    })
}

/// Best-effort delete of a path previously returned by this subsystem.
/// Validated structurally against the temp root and the generated-name
/// grammar before anything is touched.
pub fn cleanup_temp(state: &ViewerState, path: &str) -> CommandResult<()> {
    state
        .temp
        .cleanup(Path::new(path))
        .map_err(|e| CommandError::CleanupRefused {
            message: format!("{e:#}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::harness::{scripted_state, ScriptedTool};

    #[test]
    fn test_command_error_serialization() {
        let err = CommandError::source_not_found("/books/missing.djvu");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "source_not_found");
        assert!(json["message"]
            .as_str()
            .unwrap()
            .contains("/books/missing.djvu"));
    }

    #[tokio::test]
    async fn test_get_info_composes_the_probes() {
        let mut tool = ScriptedTool::new(12);
        tool.outline_text = "(bookmarks (\"A\" \"#1\"))".to_string();
        let (state, _events, _tool, guard) = scripted_state(tool, 4);

        let source = guard.path().join("book.djvu");
        std::fs::write(&source, b"AT&TFORM").unwrap();

        let info = get_info(&state, &source.display().to_string())
            .await
            .unwrap();
        assert_eq!(info.page_count, 12);
        assert_eq!(info.source_dpi, 300);
        assert!(info.has_outline);
        assert!(info.has_text);
        assert_eq!(info.metadata.page_width, 2550);
        assert_eq!(info.metadata.file_size_bytes, 8);
    }

    #[tokio::test]
    async fn test_get_info_missing_source() {
        let (state, _events, _tool, guard) = scripted_state(ScriptedTool::new(3), 4);
        let missing = guard.path().join("missing.djvu").display().to_string();

        let err = get_info(&state, &missing).await.unwrap_err();
        assert!(matches!(err, CommandError::SourceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_cancel_unknown_or_malformed_job_id() {
        let (state, _events, _tool, _guard) = scripted_state(ScriptedTool::new(3), 4);

        assert!(!cancel(&state, "not-a-job-id").cancelled);
        assert!(!cancel(&state, &uuid::Uuid::new_v4().to_string()).cancelled);
    }

    #[tokio::test]
    async fn test_cleanup_temp_refuses_foreign_paths() {
        let (state, _events, _tool, guard) = scripted_state(ScriptedTool::new(3), 4);

        let outside = guard.path().join("vlm-1712345678901-0a1b2c3d.pdf");
        std::fs::write(&outside, b"x").unwrap();
        assert!(cleanup_temp(&state, &outside.display().to_string()).is_err());
        assert!(outside.exists());

        // a generated artifact is reclaimed fine
        let inside = state.temp.artifact_path("pdf");
        std::fs::write(&inside, b"x").unwrap();
        cleanup_temp(&state, &inside.display().to_string()).unwrap();
        assert!(!inside.exists());
    }
}
