//! Error types for nsmeta core.

use crate::types::TransactionId;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Coarse classification of a [`CoreError`], used by retry policies and
/// callers that only care about what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Invalid input; rejected before any transaction starts.
    Validation,
    /// Write-write conflict detected at commit time.
    Conflict,
    /// The transaction body failed for a reason other than a conflict.
    Application,
    /// A table could not be obtained or created.
    Initialization,
    /// A retry sleep was interrupted.
    Interrupted,
    /// Storage, codec, locking or state-machine failure.
    Internal,
}

/// Errors that can occur in nsmeta core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] nsmeta_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid input.
    #[error("validation failed: {message}")]
    Validation {
        /// What was wrong with the input.
        message: String,
    },

    /// Another transaction committed an overlapping write first.
    #[error("transaction {txid} conflicts with {conflicts} committed change(s)")]
    Conflict {
        /// The transaction that lost.
        txid: TransactionId,
        /// Number of overlapping changes.
        conflicts: usize,
    },

    /// The transaction body failed; the transaction was rolled back.
    #[error("transaction body failed: {source}")]
    Application {
        /// The failure raised by the body.
        #[source]
        source: Box<CoreError>,
    },

    /// A table could not be obtained or created.
    #[error("table `{table}` unavailable: {source}")]
    Initialization {
        /// Name of the table.
        table: String,
        /// Underlying failure.
        #[source]
        source: Box<CoreError>,
    },

    /// A retry sleep was interrupted.
    #[error("operation interrupted")]
    Interrupted,

    /// A value could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// A table log could not be replayed.
    #[error("table log corruption: {message}")]
    LogCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// The store directory is locked by another process.
    #[error("store locked: another process has exclusive access")]
    StoreLocked,

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a log corruption error.
    pub fn log_corruption(message: impl Into<String>) -> Self {
        Self::LogCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an initialization error for `table`.
    pub fn initialization(table: impl Into<String>, source: CoreError) -> Self {
        Self::Initialization {
            table: table.into(),
            source: Box::new(source),
        }
    }

    /// Wraps a failure raised inside a transaction body.
    ///
    /// Conflicts, interruptions and already-wrapped failures pass through
    /// unchanged so they keep their classification.
    #[must_use]
    pub fn into_application(self) -> Self {
        match self {
            Self::Conflict { .. } | Self::Application { .. } | Self::Interrupted => self,
            other => Self::Application {
                source: Box::new(other),
            },
        }
    }

    /// Returns the failure kind.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Validation { .. } => FailureKind::Validation,
            Self::Conflict { .. } => FailureKind::Conflict,
            Self::Application { .. } => FailureKind::Application,
            Self::Initialization { .. } => FailureKind::Initialization,
            Self::Interrupted => FailureKind::Interrupted,
            Self::Storage(_)
            | Self::Io(_)
            | Self::Codec { .. }
            | Self::LogCorruption { .. }
            | Self::StoreLocked
            | Self::InvalidOperation { .. } => FailureKind::Internal,
        }
    }

    /// Returns true for write-write conflicts.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.kind() == FailureKind::Conflict
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::codec(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_wraps_plain_failures() {
        let err = CoreError::codec("bad json").into_application();
        assert_eq!(err.kind(), FailureKind::Application);
        assert!(err.to_string().contains("bad json"));
    }

    #[test]
    fn application_keeps_conflicts() {
        let err = CoreError::Conflict {
            txid: TransactionId::new(4),
            conflicts: 1,
        }
        .into_application();
        assert!(err.is_conflict());
    }

    #[test]
    fn application_does_not_double_wrap() {
        let err = CoreError::validation("x").into_application().into_application();
        match err {
            CoreError::Application { source } => {
                assert_eq!(source.kind(), FailureKind::Validation)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn initialization_kind() {
        let err = CoreError::initialization("namespaces", CoreError::StoreLocked);
        assert_eq!(err.kind(), FailureKind::Initialization);
        assert!(err.to_string().contains("namespaces"));
    }
}
