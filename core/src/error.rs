use std::io;
use std::path::PathBuf;

use huddle_protocol::protocol::ErrorKind;
use thiserror::Error;

/// Why a working directory was rejected by the sandbox.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathRejection {
    /// The input contained parent-directory segments, home-directory
    /// shorthand, or was not absolute.
    #[error("path contains traversal segments: {0}")]
    PathTraversal(PathBuf),

    /// The resolved path falls under a denied system root.
    #[error("path is inside a protected system directory: {0}")]
    SystemDirectory(PathBuf),

    #[error("directory does not exist: {0}")]
    NotFound(PathBuf),
}

/// Why a free-text prompt was rejected by the sandbox.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PromptRejection {
    #[error("prompt is empty")]
    Empty,

    #[error("prompt is too long ({actual} chars, max {max})")]
    TooLong { actual: usize, max: usize },

    /// The prompt matched one of the destructive-verb patterns.
    #[error("prompt contains a blocked pattern: {0}")]
    BlockedPattern(&'static str),
}

/// Failures that short-circuit [`crate::ExecutionManager::execute`] before
/// any process is spawned and before any rate-limit or context mutation.
///
/// Process-level outcomes (timeout, non-zero exit, spawn failure) are *not*
/// errors at this level: they travel on the failure branch of the
/// [`huddle_protocol::protocol::ExecutionResult`] so the caller still gets
/// output, duration and a `command-completed` broadcast.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("invalid working directory: {0}")]
    PathInvalid(#[from] PathRejection),

    #[error("invalid prompt: {0}")]
    PromptInvalid(#[from] PromptRejection),

    #[error("rate limit exceeded; retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
}

impl ExecutionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutionError::PathInvalid(_) => ErrorKind::PathInvalid,
            ExecutionError::PromptInvalid(_) => ErrorKind::PromptInvalid,
            ExecutionError::RateLimited { .. } => ErrorKind::RateLimited,
        }
    }
}

/// I/O failure in the context store. Non-fatal for the surrounding command:
/// callers log it and proceed without context wrapping.
#[derive(Error, Debug)]
#[error("context storage error: {0}")]
pub struct ContextStorageError(#[from] pub io::Error);
