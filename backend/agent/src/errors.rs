//! Application-wide error types.
//!
//! The taxonomy mirrors how failures are handled: validation and guard
//! rejections are recoverable by the caller, auth failures require a wallet
//! session, and transport-level failures (chain, storage, webhook) reset
//! in-progress state so the operation can be retried manually.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Rejected: {0}")]
    Rejected(RejectReason),

    #[error("Chain error: {0}")]
    Chain(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Webhook error: {0}")]
    Webhook(String),
}

/// Why a guarded operation was refused without being attempted.
///
/// Distinct from [`AgentError::Validation`]: a rejected call was well-formed
/// but lost to a guard (cooldown window, duplicate content, or an operation
/// already in flight) and may simply be retried later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Called again before the cooldown window elapsed.
    Cooldown,
    /// A file with the same name and size was already uploaded this session.
    Duplicate,
    /// Another instance of the operation is still in flight.
    Busy,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cooldown => write!(f, "cooldown window has not elapsed"),
            Self::Duplicate => write!(f, "identical file already uploaded"),
            Self::Busy => write!(f, "operation already in flight"),
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
