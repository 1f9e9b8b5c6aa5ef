//! Snapshot indexing
//!
//! [`FileTracker`] walks a source tree through a
//! [`SourceProvider`](crate::source::SourceProvider) and produces a
//! [`Snapshot`]. The walk is an explicit stack rather than recursion, so deep
//! trees cannot exhaust the call stack.
//!
//! ## Rules
//!
//! - A directory is recorded only if the provider exposes it and no exclusion
//!   matches its full path. Excluded directories are pruned: nothing below
//!   them is visited, even if no rule matches the deeper paths.
//! - Files follow the same rule. Their digest is computed by the provider
//!   (content hash locally, metadata surrogate for remote trees).
//! - Unreadable directories and files are logged and skipped; the walk
//!   carries on. So are names that are not valid UTF-8, which the text
//!   `.index` cannot record losslessly.
//! - A missing, excluded or empty root yields an empty snapshot and a
//!   warning. The warning is suppressed in quiet mode, which restore uses to
//!   inspect directories that may legitimately not exist yet.
//!
//! ## Example
//!
//! ```rust
//! use backchain::file_tracking::FileTracker;
//! use backchain::source::LocalSource;
//! use std::fs;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let dir = tempfile::tempdir()?;
//! fs::write(dir.path().join("keep.txt"), b"keep")?;
//! fs::write(dir.path().join("skip.tmp"), b"skip")?;
//!
//! let snapshot = FileTracker::new(dir.path().to_path_buf())
//!     .with_exclusions(vec!["*.tmp".to_string()])
//!     .scan(&LocalSource::new());
//! assert_eq!(snapshot.file_count(), 1);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use crate::exclusion::ExclusionSet;
use crate::paths::PathRules;
use crate::snapshot::Snapshot;
use crate::source::{EntryKind, SourceProvider};
use crate::types::{ProgressCallback, ProgressInfo};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, trace, warn};

/// Builds snapshots of one root directory
pub struct FileTracker {
    /// Root directory to index
    root_path: PathBuf,
    /// Exclusion globs (pair-specific plus global)
    exclusions: Vec<String>,
    /// Case rules for exclusion matching
    rules: PathRules,
    /// Suppress the empty-root warning
    quiet: bool,
    /// Optional progress reporting
    progress: Option<ProgressCallback>,
}

impl fmt::Debug for FileTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileTracker")
            .field("root_path", &self.root_path)
            .field("exclusions", &self.exclusions)
            .field("rules", &self.rules)
            .field("quiet", &self.quiet)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl FileTracker {
    /// Create a tracker with no exclusions and platform case rules
    pub fn new(root_path: PathBuf) -> Self {
        Self {
            root_path,
            exclusions: Vec::new(),
            rules: PathRules::platform(),
            quiet: false,
            progress: None,
        }
    }

    /// Set exclusion globs
    pub fn with_exclusions(mut self, exclusions: Vec<String>) -> Self {
        self.exclusions = exclusions;
        self
    }

    /// Set case rules
    pub fn with_rules(mut self, rules: PathRules) -> Self {
        self.rules = rules;
        self
    }

    /// Do not warn when the root is missing, excluded or empty
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Report progress once per indexed file
    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Walk the tree and build a snapshot
    #[instrument(skip(self, source), fields(root = %self.root_path.display()))]
    pub fn scan(&self, source: &dyn SourceProvider) -> Snapshot {
        let exclusion_set = ExclusionSet::new(&self.exclusions, self.rules);
        let mut dirs = BTreeSet::new();
        let mut files = BTreeMap::new();

        if !self.is_valid_dir(&self.root_path, source, &exclusion_set) {
            if !self.quiet {
                warn!(
                    "Root dir {:?} does not exist or is excluded",
                    self.root_path
                );
            }
            return self.finish(dirs, files, source);
        }

        let mut stack = vec![self.root_path.clone()];
        let mut processed = 0usize;

        while let Some(dir) = stack.pop() {
            let entries = match source.list(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Could not list {:?}: {}", dir, e);
                    continue;
                }
            };

            for entry in entries {
                if !source.is_visible(&entry.path) || exclusion_set.is_excluded(&entry.path) {
                    trace!("Skipping {:?}", entry.path);
                    continue;
                }
                // The index is text; such a name could not be restored
                if entry.path.to_str().is_none() {
                    warn!("{:?} is not valid UTF-8, skipping", entry.path);
                    continue;
                }
                match entry.kind {
                    EntryKind::Dir => {
                        dirs.insert(entry.path.clone());
                        stack.push(entry.path);
                    }
                    EntryKind::File => match source.digest(&entry.path) {
                        Ok(digest) => {
                            processed += 1;
                            if let Some(progress) = &self.progress {
                                progress(ProgressInfo {
                                    operation: "Indexing".to_string(),
                                    current_item: Some(entry.path.to_string_lossy().into_owned()),
                                    processed,
                                });
                            }
                            files.insert(entry.path, digest);
                        }
                        Err(e) => warn!("Could not process file {:?}: {}", entry.path, e),
                    },
                    EntryKind::Other => debug!("Ignoring special entry {:?}", entry.path),
                }
            }
        }

        if files.is_empty() && !self.quiet {
            warn!("No files found under {:?}", self.root_path);
        }
        info!("Indexed {} files in {} dirs", files.len(), dirs.len() + 1);

        self.finish(dirs, files, source)
    }

    fn is_valid_dir(&self, path: &Path, source: &dyn SourceProvider, exclusions: &ExclusionSet) -> bool {
        source.stat(path).map(|e| e.is_dir()).unwrap_or(false)
            && source.is_visible(path)
            && !exclusions.is_excluded(path)
    }

    fn finish(
        &self,
        dirs: BTreeSet<PathBuf>,
        files: BTreeMap<PathBuf, String>,
        source: &dyn SourceProvider,
    ) -> Snapshot {
        Snapshot::new(
            self.root_path.clone(),
            dirs,
            files,
            self.exclusions.clone(),
            source.digest_mode(),
        )
    }
}
