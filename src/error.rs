//! Error types for the folio generation engine.

use crate::types::{ChapterId, ProjectId};
use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error("Chapter not found: {0}")]
    ChapterNotFound(ChapterId),

    #[error("Unit {seq} not found in chapter {chapter_id}")]
    UnitNotFound { chapter_id: ChapterId, seq: u32 },

    #[error("Block position conflict in chapter {chapter_id}: expected {expected}, got {actual}")]
    BlockPositionConflict {
        chapter_id: ChapterId,
        expected: u32,
        actual: u32,
    },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// How a collaborator failure should be handled by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Backoff with the rate-limit multiplier, then retry.
    RateLimited,
    /// Backoff with the transient multiplier, then retry.
    Transient,
    /// Not retried; fatal to the run.
    Fatal,
}

/// Classified errors returned by the outline, content and summary services.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Degenerate response: {length} characters, minimum is {minimum}")]
    Degenerate { length: usize, minimum: usize },

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl ServiceError {
    pub fn class(&self) -> RetryClass {
        match self {
            ServiceError::RateLimited(_) => RetryClass::RateLimited,
            ServiceError::Server { .. }
            | ServiceError::Timeout(_)
            | ServiceError::Unavailable(_)
            | ServiceError::Malformed(_)
            | ServiceError::Degenerate { .. } => RetryClass::Transient,
            ServiceError::Rejected(_) | ServiceError::Cancelled => RetryClass::Fatal,
        }
    }
}

/// Outcome of a retried collaborator call that did not succeed.
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: ServiceError },

    #[error("Cancelled")]
    Cancelled,

    #[error("Unrecoverable service error: {0}")]
    Fatal(ServiceError),
}

/// Crate-level error surfaced by the orchestrator, config and CLI layers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Service error: {0}")]
    ServiceError(#[from] ServiceError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("A generation run is already in progress for project {0}")]
    RunInProgress(ProjectId),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("{missing} chapter(s) still lack an outline after {passes} outline passes")]
    OutlineIncomplete { missing: usize, passes: u32 },

    #[error("Generation failed: {0}")]
    GenerationFailed(String),
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::IoError(std::io::Error::new(
            std::io::ErrorKind::Other,
            err.to_string(),
        ))
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::IoError(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            err.to_string(),
        ))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::IoError(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            err.to_string(),
        ))
    }
}
