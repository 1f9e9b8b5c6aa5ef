//! Error types for the Backchain library
//!
//! Every fallible operation returns [`Result<T>`]. Not every failure is fatal:
//! the restore engine absorbs not-found and read failures at the item level and
//! records them in a [`RestoreReport`](crate::types::RestoreReport), so a chain
//! walk can continue past a single damaged archive. Errors that do propagate
//! carry enough context (path, archive, destination) that retrying the same
//! operation after fixing the cause is safe.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the Backchain library
pub type Result<T> = std::result::Result<T, BackchainError>;

/// Main error type for all Backchain operations
#[derive(Debug, Error)]
pub enum BackchainError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization of reports
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// Exclusion glob could not be compiled
    #[error("Invalid exclusion pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern
        pattern: String,
        /// Why it was rejected
        reason: String,
    },

    /// Archive file does not exist
    #[error("Archive not found: {0:?}")]
    ArchiveNotFound(PathBuf),

    /// Archive exists but could not be decoded
    #[error("Corrupt archive {path:?}: {reason}")]
    CorruptArchive {
        /// Path to the archive
        path: PathBuf,
        /// Decoder error
        reason: String,
    },

    /// A member is recorded in the snapshot but its bytes live in another archive
    #[error("Member '{member}' not stored in {archive:?}")]
    MemberNotFound {
        /// Archive member name
        member: String,
        /// Archive that was searched
        archive: PathBuf,
    },

    /// Requested file or folder was not found in any archive
    #[error("Not found: {0}")]
    NotFound(String),

    /// Destination directory is missing and could not be created
    #[error("Destination unavailable: {path:?}")]
    DestinationUnavailable {
        /// Destination directory
        path: PathBuf,
    },

    /// Source path could not be read through the source provider
    #[error("Source unavailable: {path:?}")]
    SourceUnavailable {
        /// Source path
        path: PathBuf,
    },

    /// Several versions exist and no selection was supplied
    #[error("{versions} versions of '{name}' found, a selection is required")]
    SelectionRequired {
        /// Requested name
        name: String,
        /// Number of distinct versions
        versions: usize,
    },

    /// Explicit or interactive selection is out of range
    #[error("Invalid selection {index}: {available} versions available")]
    InvalidSelection {
        /// Zero-based index that was requested
        index: usize,
        /// Number of versions available
        available: usize,
    },

    /// `.index` member could not be parsed
    #[error("Invalid index file: {0}")]
    InvalidIndexFile(String),

    /// Directory-pair registry error
    #[error("Registry error: {0}")]
    Registry(String),

    /// Timestamp could not be parsed or generated
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),

    /// Custom error type for extensions
    #[error("{0}")]
    Custom(String),
}

impl BackchainError {
    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        BackchainError::Internal(msg.into())
    }

    /// Create a registry error with a custom message
    pub fn registry(msg: impl Into<String>) -> Self {
        BackchainError::Registry(msg.into())
    }

    /// Create a custom error with a custom message
    pub fn custom(msg: impl Into<String>) -> Self {
        BackchainError::Custom(msg.into())
    }

    /// Check if this error means "nothing to act on" rather than a failure
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BackchainError::NotFound(_)
                | BackchainError::ArchiveNotFound(_)
                | BackchainError::MemberNotFound { .. }
        )
    }

    /// Check if retrying the operation could succeed without intervention
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BackchainError::SelectionRequired { .. }
                | BackchainError::InvalidSelection { .. }
                | BackchainError::MemberNotFound { .. }
                | BackchainError::CorruptArchive { .. }
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            BackchainError::DestinationUnavailable { path } => {
                format!(
                    "Destination {:?} does not exist and could not be created. \
                     Check permissions or free space and run the backup again.",
                    path
                )
            }
            BackchainError::SelectionRequired { name, versions } => {
                format!(
                    "{} versions of '{}' exist. Pass --index to choose one (0 is the newest).",
                    versions, name
                )
            }
            BackchainError::InvalidSelection { index, available } => {
                format!(
                    "Version {} does not exist; choose between 0 and {}.",
                    index,
                    available.saturating_sub(1)
                )
            }
            BackchainError::NotFound(name) => {
                format!("'{}' was not found in any backup. Try the bare file name.", name)
            }
            _ => self.to_string(),
        }
    }
}
