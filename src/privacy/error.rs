//! Error types for privacy profile operations.
//!
//! Every failure is returned to the immediate caller. [`PrivacyError::kind`]
//! folds the variants into the four classes callers branch on.

use thiserror::Error;

use crate::identity::IdentityKey;

/// Error type for privacy engine operations.
#[derive(Error, Debug)]
pub enum PrivacyError {
    /// The owner has no registered privacy profile.
    #[error("User not found: {0}")]
    UserNotFound(IdentityKey),

    /// No pair record exists for the owner/target pair.
    #[error("Pair record not found: {owner} -> {target}")]
    PairNotFound {
        /// Owner of the missing record.
        owner: IdentityKey,
        /// Target of the missing record.
        target: IdentityKey,
    },

    /// The owner is already registered.
    #[error("User already registered: {0}")]
    AlreadyExists(IdentityKey),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database error from `SQLite`.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Stored or supplied data could not be interpreted.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Engine configuration could not be parsed.
    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// The operation's deadline passed before it could start its next step.
    #[error("Operation deadline exceeded")]
    DeadlineExceeded,

    /// Persisted state broke an engine invariant. Indicates a bug.
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),
}

/// Result type alias for privacy operations.
pub type Result<T> = std::result::Result<T, PrivacyError>;

/// Coarse classification of a [`PrivacyError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A required owner or pair record does not exist.
    NotFound,
    /// Duplicate registration.
    AlreadyExists,
    /// The store could not complete the read or write (including
    /// cancellation and timeouts).
    PersistenceFailure,
    /// Internal consistency check failed.
    InvariantViolation,
}

impl PrivacyError {
    /// Returns the class this error belongs to.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UserNotFound(_) | Self::PairNotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::Storage(_)
            | Self::Database(_)
            | Self::InvalidData(_)
            | Self::Config(_)
            | Self::Cancelled
            | Self::DeadlineExceeded => ErrorKind::PersistenceFailure,
            Self::InvariantViolation(_) => ErrorKind::InvariantViolation,
        }
    }

    pub(crate) fn lock_poisoned(what: &str, err: impl std::fmt::Display) -> Self {
        Self::Storage(format!("Failed to acquire {what} lock: {err}"))
    }
}
