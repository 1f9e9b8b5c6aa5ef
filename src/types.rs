//! Core data types used throughout the Backchain library
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Registry entries**: `DirectoryPair` - a source directory and where its archives go
//! - **Operation results**: `BackupOutcome`, `RestoreReport`, `RestoreAction`
//! - **Configuration**: `BackchainConfig` - exclusions, matching rules, deletion policy
//! - **Progress**: `ProgressInfo`, `ProgressCallback` - indexing progress for front ends
//!
//! ## Examples
//!
//! ```rust
//! use backchain::types::{BackchainConfig, DirectoryPair};
//!
//! let pair = DirectoryPair::new("/home/me/docs", "/mnt/backup/docs")
//!     .with_exclusions(vec!["*.tmp".to_string()]);
//! assert_eq!(pair.exclusions.len(), 1);
//!
//! let config = BackchainConfig {
//!     global_exclusions: vec!["*/.cache*".to_string()],
//!     ..Default::default()
//! };
//! assert!(!config.record_deletions);
//! ```

use crate::paths::PathRules;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A registered source directory and the destination holding its archives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryPair {
    /// Directory being backed up
    pub source: PathBuf,
    /// Directory receiving `<timestamp>_backup.tar.gz` archives
    pub destination: PathBuf,
    /// Exclusion globs that only apply to this pair
    pub exclusions: Vec<String>,
}

impl DirectoryPair {
    /// Create a pair without exclusions
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            exclusions: Vec::new(),
        }
    }

    /// Attach per-pair exclusions
    pub fn with_exclusions(mut self, exclusions: Vec<String>) -> Self {
        self.exclusions = exclusions;
        self
    }

    /// Per-pair exclusions followed by the global ones
    pub fn effective_exclusions(&self, global: &[String]) -> Vec<String> {
        let mut all = self.exclusions.clone();
        for pattern in global {
            if !all.contains(pattern) {
                all.push(pattern.clone());
            }
        }
        all
    }

    /// Whether `path` is this pair's source under the given rules
    pub fn is_source(&self, path: &Path, rules: &PathRules) -> bool {
        rules.paths_equal(&self.source, path)
    }
}

/// How file digests are computed for a snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DigestMode {
    /// SHA-256 of the file content
    #[default]
    Content,
    /// SHA-256 of path, size and modification time
    Surrogate,
}

/// What a backup run did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupStatus {
    /// A new archive was written
    Written,
    /// Nothing changed since the previous archive
    NoChanges,
    /// The source produced no files
    EmptySource,
    /// Only deletions were detected and deletion-only runs are not recorded
    DeletionsOnlyDiscarded,
}

/// Result of backing up one directory pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupOutcome {
    /// Archive written, if any
    pub archive: Option<PathBuf>,
    /// Timestamp that was (or would have been) used
    pub timestamp: String,
    /// Files recorded in the new snapshot
    pub files_indexed: usize,
    /// Files whose bytes were stored in the archive
    pub files_added: usize,
    /// Files present in the previous snapshot but gone now
    pub files_missing: usize,
    /// Uncompressed size of the stored files
    pub bytes_added: u64,
    /// What happened
    pub status: BackupStatus,
}

impl BackupOutcome {
    /// Check whether an archive was produced
    pub fn is_written(&self) -> bool {
        self.status == BackupStatus::Written
    }
}

/// What happened to a single restore request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestoreAction {
    /// Bytes were written to this path
    Restored(PathBuf),
    /// The on-disk file already matched
    Unchanged(PathBuf),
    /// The snapshot lists the file but its bytes are in another archive
    MemberMissing(String),
    /// The snapshot does not list the requested file
    NotInSnapshot,
}

/// Aggregated result of a restore operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreReport {
    /// Files written
    pub files_restored: usize,
    /// Files skipped because their digest already matched
    pub files_unchanged: usize,
    /// Files whose archive member was absent
    pub members_missing: usize,
    /// Empty directories recreated
    pub directories_created: usize,
    /// Requested names that matched nothing
    pub not_found: Vec<String>,
    /// Per-item problems that did not abort the operation
    pub warnings: Vec<String>,
}

impl RestoreReport {
    /// Fold the outcome of one `restore_file` into the report
    pub fn record(&mut self, action: &RestoreAction) {
        match action {
            RestoreAction::Restored(_) => self.files_restored += 1,
            RestoreAction::Unchanged(_) => self.files_unchanged += 1,
            RestoreAction::MemberMissing(_) => self.members_missing += 1,
            RestoreAction::NotInSnapshot => {}
        }
    }

    /// Combine another report into this one
    pub fn merge(&mut self, other: RestoreReport) {
        self.files_restored += other.files_restored;
        self.files_unchanged += other.files_unchanged;
        self.members_missing += other.members_missing;
        self.directories_created += other.directories_created;
        self.not_found.extend(other.not_found);
        self.warnings.extend(other.warnings);
    }

    /// Check if anything was written
    pub fn has_changes(&self) -> bool {
        self.files_restored > 0 || self.directories_created > 0
    }
}

/// Library-wide configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackchainConfig {
    /// Exclusions applied to every pair
    pub global_exclusions: Vec<String>,
    /// Name matching rules
    pub rules: PathRules,
    /// Keep archives whose only change is deleted files
    pub record_deletions: bool,
    /// Registry contents embedded as `.backpy` in every archive
    pub registry_text: Option<String>,
}

/// Callback invoked while a snapshot is being built
pub type ProgressCallback = Arc<dyn Fn(ProgressInfo) + Send + Sync>;

/// Snapshot indexing progress
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Operation being performed
    pub operation: String,
    /// Current item being processed
    pub current_item: Option<String>,
    /// Items processed so far
    pub processed: usize,
}
