//! Snapshot comparison
//!
//! Only the files reported by [`changed_files`] get their bytes stored in a
//! new archive; everything else is referenced by digest alone. Files reported
//! by [`missing_files`] are informational: a deleted file simply stops being
//! listed, and its bytes stay reachable through the older archives.

use crate::snapshot::Snapshot;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Files in `new` whose digest is absent from or differs from `old`
///
/// With no previous snapshot every file counts as changed.
pub fn changed_files(new: &Snapshot, old: Option<&Snapshot>) -> Vec<PathBuf> {
    new.files()
        .iter()
        .filter(|(path, digest)| match old {
            Some(old) => old.digest_of(path) != Some(digest.as_str()),
            None => true,
        })
        .map(|(path, _)| path.clone())
        .collect()
}

/// Files recorded in `old` but no longer present in `new`
pub fn missing_files(new: &Snapshot, old: Option<&Snapshot>) -> Vec<PathBuf> {
    match old {
        Some(old) => old
            .files()
            .keys()
            .filter(|path| new.digest_of(path).is_none())
            .cloned()
            .collect(),
        None => Vec::new(),
    }
}

/// Summary of the differences between two snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDiff {
    /// Files that are new in the newer snapshot
    pub added: Vec<PathBuf>,
    /// Files present in both with different digests
    pub modified: Vec<PathBuf>,
    /// Files that disappeared
    pub missing: Vec<PathBuf>,
}

impl SnapshotDiff {
    /// Classify every difference between `old` and `new`
    pub fn between(new: &Snapshot, old: Option<&Snapshot>) -> Self {
        let (modified, added): (Vec<PathBuf>, Vec<PathBuf>) = changed_files(new, old)
            .into_iter()
            .partition(|path| old.map(|o| o.digest_of(path).is_some()).unwrap_or(false));
        Self {
            added,
            modified,
            missing: missing_files(new, old),
        }
    }

    /// Files whose bytes have to be stored
    pub fn changed_count(&self) -> usize {
        self.added.len() + self.modified.len()
    }

    /// Check if the snapshots differ at all
    pub fn has_changes(&self) -> bool {
        self.changed_count() > 0 || !self.missing.is_empty()
    }
}
