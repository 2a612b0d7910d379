//! Workflow error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw input could not be turned into the current step's value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub step: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            message: message.into(),
        }
    }
}

/// Errors returned by driver operations. None of them alter the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("Invalid answer for {}: {}", .0.step, .0.message)]
    Validation(#[from] ValidationError),
    #[error("Workflow is complete, no further answers are accepted")]
    WorkflowComplete,
    #[error("Answer for step {step} while {} is current", .current.as_deref().unwrap_or("no step"))]
    OutOfOrderAnswer {
        step: String,
        current: Option<String>,
    },
    #[error("Corrupt conversation metadata: {0}")]
    CorruptMetadata(String),
    #[error("Conversation is closed")]
    ConversationClosed,
    #[error("Conversation is not finished yet")]
    NotFinished,
    #[error("Unknown step: {0}")]
    UnknownStep(String),
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::Validation(_) => ErrorKind::Validation,
            WorkflowError::WorkflowComplete => ErrorKind::WorkflowComplete,
            WorkflowError::OutOfOrderAnswer { .. } => ErrorKind::OutOfOrderAnswer,
            WorkflowError::CorruptMetadata(_) => ErrorKind::CorruptMetadata,
            WorkflowError::ConversationClosed => ErrorKind::ConversationClosed,
            WorkflowError::NotFinished => ErrorKind::NotFinished,
            WorkflowError::UnknownStep(_) => ErrorKind::UnknownStep,
        }
    }
}

/// Error classification for callers and UI display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    WorkflowComplete,
    OutOfOrderAnswer,
    CorruptMetadata,
    ConversationClosed,
    NotFinished,
    UnknownStep,
}

impl ErrorKind {
    /// The user can fix this by sending a different answer
    pub fn is_user_recoverable(self) -> bool {
        matches!(self, Self::Validation)
    }

    /// Integration bugs or foreign data, never retried
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::OutOfOrderAnswer | Self::CorruptMetadata)
    }
}
