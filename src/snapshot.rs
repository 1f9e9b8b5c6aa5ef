//! Snapshots: the digest state of a directory tree at one point in time
//!
//! A [`Snapshot`] records every directory and every file (with its digest)
//! that was visible under a root when it was indexed. Snapshots are built by
//! [`FileTracker`](crate::file_tracking::FileTracker) or parsed back from an
//! archive's `.index` member, and are never modified afterwards.

use crate::paths::{is_full_path, PathRules};
use crate::types::DigestMode;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Directory set and file→digest map for one tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    root: PathBuf,
    dirs: BTreeSet<PathBuf>,
    files: BTreeMap<PathBuf, String>,
    exclusions: Vec<String>,
    digest_mode: DigestMode,
}

impl Snapshot {
    /// Assemble a snapshot; the root is always part of the directory set
    pub fn new(
        root: PathBuf,
        mut dirs: BTreeSet<PathBuf>,
        files: BTreeMap<PathBuf, String>,
        exclusions: Vec<String>,
        digest_mode: DigestMode,
    ) -> Self {
        dirs.insert(root.clone());
        Self {
            root,
            dirs,
            files,
            exclusions,
            digest_mode,
        }
    }

    /// A snapshot of nothing under `root`
    pub fn empty(root: impl Into<PathBuf>) -> Self {
        Self::new(
            root.into(),
            BTreeSet::new(),
            BTreeMap::new(),
            Vec::new(),
            DigestMode::Content,
        )
    }

    /// Root the snapshot was taken from
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All recorded directories, sorted
    pub fn dirs(&self) -> &BTreeSet<PathBuf> {
        &self.dirs
    }

    /// All recorded files and their digests, sorted by path
    pub fn files(&self) -> &BTreeMap<PathBuf, String> {
        &self.files
    }

    /// Exclusion globs that were in force
    pub fn exclusions(&self) -> &[String] {
        &self.exclusions
    }

    /// How digests were computed
    pub fn digest_mode(&self) -> DigestMode {
        self.digest_mode
    }

    /// Number of recorded files
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Check if no files were recorded
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Digest recorded for an exact path
    pub fn digest_of(&self, path: &Path) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    /// Resolve `name` to a recorded file and its digest
    ///
    /// With `exact`, `name` must equal a recorded path. Otherwise a full path
    /// is still looked up directly, while a relative name matches recorded
    /// paths ending in the same components (`five`, `four/five`). The first
    /// match in sorted order wins.
    pub fn find_file(&self, name: &Path, exact: bool, rules: &PathRules) -> Option<(&Path, &str)> {
        if exact || is_full_path(name) {
            if let Some((path, digest)) = self.files.get_key_value(name) {
                return Some((path.as_path(), digest.as_str()));
            }
            if !rules.is_case_insensitive() {
                return None;
            }
            return self
                .files
                .iter()
                .find(|(path, _)| rules.paths_equal(path, name))
                .map(|(p, d)| (p.as_path(), d.as_str()));
        }
        self.files
            .iter()
            .find(|(path, _)| rules.suffix_matches(path, name))
            .map(|(p, d)| (p.as_path(), d.as_str()))
    }

    /// Resolve `name` to a recorded directory, with the same rules as [`find_file`](Self::find_file)
    pub fn find_folder(&self, name: &Path, exact: bool, rules: &PathRules) -> Option<&Path> {
        if exact || is_full_path(name) {
            return self
                .dirs
                .iter()
                .find(|dir| rules.paths_equal(dir, name))
                .map(PathBuf::as_path);
        }
        self.dirs
            .iter()
            .find(|dir| rules.suffix_matches(dir, name))
            .map(PathBuf::as_path)
    }

    /// Files recorded at or below `dir`
    pub fn files_under<'a>(
        &'a self,
        dir: &'a Path,
        rules: &'a PathRules,
    ) -> impl Iterator<Item = (&'a Path, &'a str)> + 'a {
        self.files
            .iter()
            .filter(move |(path, _)| rules.path_starts_with(path, dir))
            .map(|(p, d)| (p.as_path(), d.as_str()))
    }
}
