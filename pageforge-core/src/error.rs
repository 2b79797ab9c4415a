//! Error taxonomy shared by every pipeline component.

/// Failures that can end a pipeline run.
///
/// The two idempotent remote cases (repository already exists, hosting
/// already enabled) and per-attachment decode failures never show up here:
/// they are handled where they occur.
#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    #[error("Unauthorized")]
    Auth,
    #[error("Invalid task: {0}")]
    Validation(String),
    #[error("Generation backend error: {0}")]
    Backend(String),
    #[error("{path} not found in {repo}")]
    NotFound { repo: String, path: String },
    #[error("Version conflict writing {path} in {repo}: {detail}")]
    Conflict {
        repo: String,
        path: String,
        detail: String,
    },
    #[error("Publish failed: {0}")]
    Publish(String),
    #[error("Could not notify {url} after {attempts} attempts: {last_error}")]
    DeliveryFailed {
        url: String,
        attempts: u32,
        last_error: String,
    },
    #[error("Task {task} round {round} nonce {nonce} is already being processed")]
    Duplicate {
        task: String,
        round: u8,
        nonce: String,
    },
}

pub type Result<T> = std::result::Result<T, ForgeError>;
