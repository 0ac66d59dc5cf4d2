//! Error taxonomy for the indexing pipeline.
//!
//! Every failure that can escape a task is an [`IndexError`]. Workers look
//! at [`IndexError::kind`] to decide between failing, retrying, or skipping:
//!
//! | Kind | Variants | Worker reaction |
//! |------|----------|-----------------|
//! | [`ErrorKind::Configuration`] | `InvalidPolicy`, `Config`, `UnknownModel`, `Unsupported` | fail, no retry |
//! | [`ErrorKind::Transient`] | `Backend`, `Timeout` | retry the whole task |
//! | [`ErrorKind::Access`] | `AccessDenied`, `NotFound` | skip |
//!
//! Partial content failures (one attachment, one embedding) never become an
//! `IndexError`: they are logged and recorded on the chunk instead.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid chunking policy: {0}")]
    InvalidPolicy(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown embedding model '{model}' for tenant '{tenant}'")]
    UnknownModel { tenant: String, model: String },

    #[error("operation not supported: {0}")]
    Unsupported(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Coarse classification used by the task worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Transient,
    Access,
}

impl IndexError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IndexError::InvalidPolicy(_)
            | IndexError::Config(_)
            | IndexError::UnknownModel { .. }
            | IndexError::Unsupported(_) => ErrorKind::Configuration,
            IndexError::AccessDenied(_) | IndexError::NotFound(_) => ErrorKind::Access,
            IndexError::Timeout(_) | IndexError::Backend(_) => ErrorKind::Transient,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Wraps any displayable backend failure.
    pub fn backend(msg: impl std::fmt::Display) -> Self {
        IndexError::Backend(anyhow::anyhow!("{}", msg))
    }
}
