use std::path::PathBuf;

use crate::branching::types::SpawnedChild;
use crate::model::{BranchStatus, ConversationId};

/// Errors related to configuration loading and parsing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config at {path}: {message}")]
    ParseError { path: PathBuf, message: String },
}

/// Errors raised by a [`crate::store::ConversationStore`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("conversation not found: {0}")]
    NotFound(ConversationId),

    #[error("record already exists: {0}")]
    AlreadyExists(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Errors surfaced synchronously by the branching operations
/// (spawn, return, branch status, continue, finalize).
#[derive(Debug, thiserror::Error)]
pub enum BranchError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conversation not found: {id}")]
    NotFound { id: ConversationId },

    #[error("access to conversation {id} is forbidden")]
    Forbidden { id: ConversationId },

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("branch {id} has already returned (status: {status})")]
    AlreadyReturned {
        id: ConversationId,
        status: BranchStatus,
    },

    #[error("spawn partially failed after creating {} children: {reason}", created.len())]
    PartialSpawnFailure {
        created: Vec<SpawnedChild>,
        reason: String,
    },

    #[error("parent {parent_id} is still waiting on {active} active branch(es)")]
    Blocked {
        parent_id: ConversationId,
        active: usize,
    },

    #[error("conversation {id} already has a run in flight")]
    RunInFlight { id: ConversationId },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Media(#[from] MediaError),
}

/// Errors from a [`crate::agent::executor::TaskExecutor`] turn.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Tool execution error: {0}")]
    Tool(String),

    #[error("invalid call to tool '{tool}': {message}")]
    InvalidToolCall { tool: String, message: String },
}

/// Errors from a [`crate::media::MediaBackend`].
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode generation request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("generation rejected: {0}")]
    Rejected(String),
}
