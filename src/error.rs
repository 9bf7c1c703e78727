//! Error types for deep work sessions.

use thiserror::Error;

/// Errors returned by session construction and mode transitions.
///
/// Failures inside worker loops never surface here; they are logged and the
/// loop carries on.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The session cannot start with this configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Applying or removing the block failed; the mode was left unchanged
    #[error("failed to update blocking: {0:#}")]
    Blocking(anyhow::Error),

    /// Break length must be positive and at most `MAX_BREAK_MINUTES`
    #[error(
        "invalid break duration: {0} minute(s), expected up to {max} minutes",
        max = crate::session::MAX_BREAK_MINUTES
    )]
    InvalidBreak(f64),

    /// The session was cleaned up and accepts no further transitions
    #[error("session is closed")]
    Closed,
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
