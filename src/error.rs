//! Relay error kinds that callers need to tell apart.
//!
//! Everything else travels as plain `anyhow::Error` with context. These variants are
//! raised inside `anyhow` and recovered with `downcast_ref::<RelayError>()`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// A required configuration key is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// A semaphore file exists but its message file does not.
    #[error(
        "orphaned semaphore file {} (expected message file {})",
        .semaphore.display(),
        .message.display()
    )]
    OrphanedSemaphoreFile { semaphore: PathBuf, message: PathBuf },

    /// A message file could not be decoded into a message document.
    #[error("malformed message file {}: {reason}", .path.display())]
    MalformedMessage { path: PathBuf, reason: String },

    /// A name that would be used as a file base name is unsafe.
    #[error("invalid base name `{0}`")]
    InvalidBaseName(String),

    /// An inbound `message_id` is already held by a different message.
    #[error("message_id {message_id} already stored for a different message ({existing})")]
    MessageIdConflict { message_id: i64, existing: String },

    /// The recipient has not collected an earlier pair with the same base name yet.
    #[error("uncollected pair still in place: {}", .semaphore.display())]
    PairPending { semaphore: PathBuf },

    /// A cycle carried on past individual failures; the cycle as a whole still failed.
    #[error("{action} cycle failed for {} item(s): {}", .failures.len(), .failures.join("; "))]
    CycleFailed {
        action: &'static str,
        failures: Vec<String>,
    },
}
