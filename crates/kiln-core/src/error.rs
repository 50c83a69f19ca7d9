//! Unified error types for Kiln

use thiserror::Error;

use crate::types::{AgentKind, AgentStatus, Credits};

/// Unified error type for all Kiln operations
#[derive(Error, Debug)]
pub enum KilnError {
    // Ledger errors
    #[error("Insufficient credits: need {required}, have {available}")]
    InsufficientCredits { required: Credits, available: Credits },

    #[error("Reservation not found: {0}")]
    ReservationNotFound(String),

    #[error("Reservation already resolved: {0}")]
    AlreadyResolved(String),

    #[error("Ledger inconsistency: {0}")]
    LedgerInconsistency(String),

    // Generative service errors
    #[error("Generative call failed: {0}")]
    Generative(String),

    #[error("API limit: {0}")]
    ApiLimit(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Unsupported request: {0}")]
    Unsupported(String),

    #[error("Parse error: {0}")]
    Parse(String),

    // Agent errors
    #[error("Agent {agent} failed: {reason}")]
    AgentFailed { agent: AgentKind, reason: String },

    #[error("Invalid agent transition: {from} -> {to}")]
    InvalidTransition { from: AgentStatus, to: AgentStatus },

    // Context errors
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl KilnError {
    /// Whether the error came from the build context rather than the work itself
    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

/// Result type alias using KilnError
pub type Result<T> = std::result::Result<T, KilnError>;
