// src/error.rs

// Custom error type for sync operations
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("settings source unreachable: {0}")]
    SourceUnreachable(String),

    #[error("artifact validation failed: {0}")]
    ArtifactInvalid(String),

    #[error("process control error: {0}")]
    ProcessControl(String),
}
