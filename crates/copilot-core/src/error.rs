/// Error types for co-pilot operations that surface to callers as `Result`s.
///
/// The streaming path never returns these: transport failures there become
/// an inline `Error` frame instead.
#[derive(Debug, thiserror::Error)]
pub enum CopilotError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Server returned {status}: {message}")]
    Status {
        status: reqwest::StatusCode,
        message: String,
    },

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for co-pilot operations
pub type Result<T> = std::result::Result<T, CopilotError>;
