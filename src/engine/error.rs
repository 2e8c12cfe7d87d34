use thiserror::Error;

use crate::identifier::IdentifierError;
use crate::model::Span;

use super::tasks::SchedulerError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Carries the identifier exactly as the caller should see it.
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid slot {slot}: {reason}")]
    InvalidSlot { slot: Span, reason: &'static str },
    #[error("{id} {reason}")]
    InvalidState { id: String, reason: &'static str },
    #[error("{request} cannot be deleted, its allocation is reused by {}", reused_by.join(", "))]
    AllocationReused {
        request: String,
        reused_by: Vec<String>,
    },
    #[error(transparent)]
    Identifier(#[from] IdentifierError),
    #[error("allocation failed: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("WAL error: {0}")]
    Wal(String),
}

impl EngineError {
    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::InvalidSlot { .. } => "invalid_slot",
            EngineError::InvalidState { .. } => "invalid_state",
            EngineError::AllocationReused { .. } => "allocation_reused",
            EngineError::Identifier(_) => "identifier",
            EngineError::Scheduler(e) => e.reason(),
            EngineError::Wal(_) => "wal",
        }
    }
}
