//! Error types for the DocShelf domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error type.

use thiserror::Error;

/// Failures talking to the remote multimodal backend.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by backend, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Cache creation failed: {0}")]
    CacheCreateFailed(String),

    #[error("Malformed backend response: {0}")]
    MalformedResponse(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failures in the file ingestion pipeline. Each is isolated to one
/// artifact; siblings keep processing.
#[derive(Debug, Clone, Error)]
pub enum IngestError {
    #[error("File limit reached ({max} files)")]
    LimitExceeded { max: usize },

    #[error("File exceeds {max} byte limit ({size} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("File is empty")]
    EmptyFile,

    #[error("File type {0} not allowed for security reasons")]
    BlockedExtension(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Conversion of {name} failed: {reason}")]
    Conversion { name: String, reason: String },

    #[error("Upload of {name} failed after retries: {reason}")]
    Upload { name: String, reason: String },

    #[error("Artifact processing was cancelled")]
    Cancelled,

    #[error("No artifact with id {0}")]
    UnknownArtifact(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Failures while driving a single conversation turn.
#[derive(Debug, Clone, Error)]
pub enum TurnError {
    #[error("Projected context exceeds the token budget by {excess} tokens")]
    OverBudget { excess: u64 },

    #[error("Tool-call loop exceeded {limit} iterations")]
    ToolLoopExceeded { limit: u32 },

    #[error("Message cannot be empty")]
    EmptyMessage,

    #[error("Message exceeds {max} character limit ({len} characters)")]
    MessageTooLong { len: usize, max: usize },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Failures executing a local tool requested by the backend.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

/// Failures producing backend-ingestible bytes from an original artifact.
#[derive(Debug, Clone, Error)]
pub enum ConvertError {
    #[error("Unsupported format: {0}")]
    Unsupported(String),

    #[error("Container error: {0}")]
    Container(String),

    #[error("Malformed document: {0}")]
    Malformed(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Page scrape failed: {0}")]
    Scrape(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_displays_correctly() {
        let err = BackendError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        };
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn ingest_limit_error_displays_max() {
        let err = IngestError::LimitExceeded { max: 50 };
        assert!(err.to_string().contains("50"));
    }

    #[test]
    fn turn_over_budget_displays_excess() {
        let err = TurnError::OverBudget { excess: 1234 };
        assert!(err.to_string().contains("1234"));
    }

    #[test]
    fn backend_error_converts_into_turn_error() {
        let err: TurnError = BackendError::Network("connection reset".into()).into();
        assert!(matches!(err, TurnError::Backend(_)));
    }
}
