//! Error types for QuiverDB core.

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Why a mutation context stopped an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller canceled the context explicitly.
    Explicit,
    /// The context deadline elapsed.
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit => f.write_str("canceled"),
            Self::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

/// Coarse classification of a [`CoreError`].
///
/// Calling layers use the kind to tell "retry safe" failures (canceled
/// contexts, bad parameters) apart from true failures without matching on
/// every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The namespace object was superseded; retried inside the facade.
    Invalidated,
    /// The mutation context was canceled or timed out.
    Canceled,
    /// Invalid arguments supplied by the caller.
    Params,
    /// A namespace does not exist (or no longer exists under that name).
    NotFound,
    /// The operation is not valid in the current state.
    Logic,
    /// Persisted or replicated bytes are malformed.
    Corruption,
    /// I/O failure.
    Io,
    /// An internal liveness bound was exhausted.
    Fatal,
}

/// Errors that can occur in QuiverDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The namespace implementation was superseded by a published copy.
    ///
    /// Only ever observed between a namespace implementation and the
    /// access facade, which re-resolves and retries.
    #[error("namespace implementation was invalidated")]
    Invalidated,

    /// The operation's mutation context was canceled.
    #[error("{what}: {reason}")]
    Canceled {
        /// Description of the interrupted wait.
        what: String,
        /// Why the context stopped the operation.
        reason: CancelReason,
    },

    /// Invalid parameters.
    #[error("invalid parameters: {message}")]
    Params {
        /// Description of the problem.
        message: String,
    },

    /// Namespace not found.
    #[error("namespace '{name}' does not exist")]
    NamespaceNotFound {
        /// Name of the namespace.
        name: String,
    },

    /// Namespace already exists.
    #[error("namespace '{name}' already exists")]
    NamespaceExists {
        /// Name of the namespace.
        name: String,
    },

    /// Operation not permitted in the current state.
    #[error("logic error: {message}")]
    Logic {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// A packed WAL record or journal frame is malformed.
    #[error("WAL corruption: {message}")]
    WalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected in a journal frame.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// The invalidation retry loop hit its bound.
    #[error("namespace access retried {attempts} times without resolving a valid implementation")]
    RetryExhausted {
        /// Number of attempts made.
        attempts: u32,
    },

    /// Document encoding error.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CoreError {
    /// Creates a canceled error for the given wait description.
    pub fn canceled(what: impl Into<String>, reason: CancelReason) -> Self {
        Self::Canceled {
            what: what.into(),
            reason,
        }
    }

    /// Creates an invalid parameters error.
    pub fn params(message: impl Into<String>) -> Self {
        Self::Params {
            message: message.into(),
        }
    }

    /// Creates a namespace not found error.
    pub fn namespace_not_found(name: impl Into<String>) -> Self {
        Self::NamespaceNotFound { name: name.into() }
    }

    /// Creates a namespace exists error.
    pub fn namespace_exists(name: impl Into<String>) -> Self {
        Self::NamespaceExists { name: name.into() }
    }

    /// Creates a logic error.
    pub fn logic(message: impl Into<String>) -> Self {
        Self::Logic {
            message: message.into(),
        }
    }

    /// Creates a WAL corruption error.
    pub fn wal_corruption(message: impl Into<String>) -> Self {
        Self::WalCorruption {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Returns the classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Invalidated => ErrorKind::Invalidated,
            Self::Canceled { .. } => ErrorKind::Canceled,
            Self::Params { .. } | Self::Codec { .. } => ErrorKind::Params,
            Self::NamespaceNotFound { .. } => ErrorKind::NotFound,
            Self::NamespaceExists { .. } | Self::Logic { .. } => ErrorKind::Logic,
            Self::WalCorruption { .. } | Self::ChecksumMismatch { .. } => ErrorKind::Corruption,
            Self::RetryExhausted { .. } => ErrorKind::Fatal,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Returns true if this is the invalidation signal.
    #[must_use]
    pub fn is_invalidated(&self) -> bool {
        matches!(self, Self::Invalidated)
    }

    /// Returns true if the operation was stopped by its mutation context.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled { .. })
    }
}
