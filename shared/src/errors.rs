/// Unified error types for the Vidfetch system.
use thiserror::Error;

/// Message fragment yt-dlp emits when a format selector matches nothing.
pub const FORMAT_UNAVAILABLE_MARKER: &str = "Requested format is not available";

/// Top-level error type for the Vidfetch system.
#[derive(Debug, Error)]
pub enum VidfetchError {
    #[error("Job already exists: {0}")]
    DuplicateJob(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced while running the external extractor.
#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("Failed to spawn {program}: {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("{program} is not installed or not on PATH")]
    NotInstalled { program: String },

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Extractor returned invalid JSON: {0}")]
    InvalidJson(String),

    /// The extractor ran and reported a failure; the message is its own text.
    #[error("{0}")]
    Failed(String),

    #[error("Extractor finished without producing a file")]
    NoOutput,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractorError {
    /// Whether the failure is yt-dlp rejecting the requested format selector.
    pub fn is_format_unavailable(&self) -> bool {
        matches!(self, ExtractorError::Failed(msg) if msg.contains(FORMAT_UNAVAILABLE_MARKER))
    }
}
