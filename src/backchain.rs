//! Main Backchain implementation
//!
//! [`Backchain`] ties the indexer, differ, archive writer and restore engine
//! together behind one configuration value. It holds no per-destination state
//! between calls: every backup reads the newest archive of its destination to
//! diff against, and every restore reads the chains it needs afresh.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use backchain::{Backchain, DirectoryPair};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backchain = Backchain::builder()
//!     .global_exclusions(vec!["*.tmp".to_string()])
//!     .build();
//!
//! let pair = DirectoryPair::new("/home/me/docs", "/mnt/backup/docs");
//! let outcome = backchain.backup(&pair)?;
//! println!("{:?}", outcome.status);
//!
//! // Bring back the newest version of a file by name
//! backchain.restore(&[pair], &["notes.txt".to_string()], Some(0), None)?;
//! # Ok(())
//! # }
//! ```

use crate::archive::{latest_backup, ArchiveWriter};
use crate::config_file::{ConfigFile, DEFAULT_SECTION};
use crate::error::{BackchainError, Result};
use crate::file_tracking::FileTracker;
use crate::paths::PathRules;
use crate::registry::{Registry, GLOBAL_SKIPS_SECTION};
use crate::restore::{RequireExplicit, Restorer, SearchMatches, VersionSelector};
use crate::snapshot::Snapshot;
use crate::source::{LocalSource, SourceProvider};
use crate::types::{BackchainConfig, BackupOutcome, DirectoryPair, ProgressCallback, RestoreReport};
use crate::utils::next_timestamp;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Entry point for backup and restore operations
pub struct Backchain {
    config: BackchainConfig,
    source: Arc<dyn SourceProvider>,
    selector: Arc<dyn VersionSelector>,
    progress: Option<ProgressCallback>,
}

impl fmt::Debug for Backchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backchain")
            .field("config", &self.config)
            .field("source", &self.source)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl Default for Backchain {
    fn default() -> Self {
        BackchainBuilder::new().build()
    }
}

impl Backchain {
    /// Local filesystem, platform case rules, explicit version selection
    pub fn new() -> Self {
        Self::default()
    }

    /// Start configuring a new instance
    pub fn builder() -> BackchainBuilder {
        BackchainBuilder::new()
    }

    /// Index a pair's source under its exclusions and the global ones
    pub fn snapshot(&self, pair: &DirectoryPair) -> Snapshot {
        FileTracker::new(pair.source.clone())
            .with_exclusions(pair.effective_exclusions(&self.config.global_exclusions))
            .with_rules(self.config.rules)
            .with_progress(self.progress.clone())
            .scan(self.source.as_ref())
    }

    /// Back up one pair with a timestamp later than any existing archive
    pub fn backup(&self, pair: &DirectoryPair) -> Result<BackupOutcome> {
        self.backup_with(pair, None)
    }

    /// Back up one pair using a caller-chosen timestamp
    pub fn backup_at(&self, pair: &DirectoryPair, timestamp: &str) -> Result<BackupOutcome> {
        self.backup_with(pair, Some(timestamp))
    }

    #[instrument(skip(self, pair), fields(source = %pair.source.display(), destination = %pair.destination.display()))]
    fn backup_with(&self, pair: &DirectoryPair, timestamp: Option<&str>) -> Result<BackupOutcome> {
        std::fs::create_dir_all(&pair.destination).map_err(|e| {
            error!("Could not create destination {:?}: {}", pair.destination, e);
            BackchainError::DestinationUnavailable {
                path: pair.destination.clone(),
            }
        })?;

        let previous = latest_backup(&pair.destination)?;
        let timestamp = match timestamp {
            Some(timestamp) => timestamp.to_string(),
            None => next_timestamp(previous.as_ref().map(|b| b.timestamp.as_str())),
        };

        let snapshot = self.snapshot(pair);
        ArchiveWriter::new(&pair.destination, self.source.as_ref())
            .with_pair_config(self.pair_config(pair))
            .record_deletions(self.config.record_deletions)
            .write(&snapshot, previous.as_ref().map(|b| &b.snapshot), &timestamp)
    }

    /// Back up every pair, carrying on past failures
    pub fn backup_all(&self, pairs: &[DirectoryPair]) -> Vec<Result<BackupOutcome>> {
        pairs
            .iter()
            .map(|pair| {
                let result = self.backup(pair);
                if let Err(e) = &result {
                    error!("Backup of {:?} failed: {}", pair.source, e);
                }
                result
            })
            .collect()
    }

    /// Text stored as `.backpy`: the registry, or just this pair
    fn pair_config(&self, pair: &DirectoryPair) -> String {
        if let Some(text) = &self.config.registry_text {
            return text.clone();
        }
        let mut file = ConfigFile::new();
        let mut row = vec![
            pair.source.to_string_lossy().into_owned(),
            pair.destination.to_string_lossy().into_owned(),
        ];
        row.extend(pair.exclusions.iter().cloned());
        file.set_section(DEFAULT_SECTION, vec![row.join(",")]);
        if !self.config.global_exclusions.is_empty() {
            file.set_section(
                GLOBAL_SKIPS_SECTION,
                vec![self.config.global_exclusions.join(",")],
            );
        }
        file.render()
    }

    fn restorer(&self) -> Restorer<'_> {
        Restorer::new(self.source.as_ref(), self.config.rules, self.selector.as_ref())
    }

    /// Distinct versions of `name` in one destination's chain
    pub fn search(&self, destination: &Path, name: &Path, exact: bool) -> Result<SearchMatches> {
        self.restorer().search_across_backups(destination, name, exact)
    }

    /// Distinct versions of `name` across all pairs, without restoring
    pub fn versions(&self, pairs: &[DirectoryPair], name: &str) -> SearchMatches {
        self.restorer().find_versions(pairs, name)
    }

    /// Find and restore one file or folder
    pub fn find_file_or_folder(
        &self,
        pairs: &[DirectoryPair],
        name: &str,
        index: Option<usize>,
        alt_root: Option<&Path>,
    ) -> Result<RestoreReport> {
        self.restorer().find_file_or_folder(pairs, name, index, alt_root)
    }

    /// Restore the named items, or everything when `names` is empty
    pub fn restore(
        &self,
        pairs: &[DirectoryPair],
        names: &[String],
        index: Option<usize>,
        alt_root: Option<&Path>,
    ) -> Result<RestoreReport> {
        let report = self.restorer().restore(pairs, names, index, alt_root)?;
        info!(
            "Restore finished: {} restored, {} unchanged, {} not found",
            report.files_restored,
            report.files_unchanged,
            report.not_found.len()
        );
        Ok(report)
    }

    /// Restore every pair to its newest state
    pub fn restore_all(&self, pairs: &[DirectoryPair], alt_root: Option<&Path>) -> Result<RestoreReport> {
        self.restorer().restore_all(pairs, alt_root)
    }

    /// Restore a bare archive directory that is not in any registry
    pub fn temp_restore(&self, backup_dir: &Path, names: &[String], alt_root: &Path) -> Result<RestoreReport> {
        let pairs = [DirectoryPair::new("", backup_dir)];
        self.restore(&pairs, names, None, Some(alt_root))
    }
}

/// Builder for [`Backchain`]
pub struct BackchainBuilder {
    config: BackchainConfig,
    source: Arc<dyn SourceProvider>,
    selector: Arc<dyn VersionSelector>,
    progress: Option<ProgressCallback>,
}

impl BackchainBuilder {
    /// Start from the defaults
    pub fn new() -> Self {
        Self {
            config: BackchainConfig::default(),
            source: Arc::new(LocalSource::new()),
            selector: Arc::new(RequireExplicit),
            progress: None,
        }
    }

    /// Exclusions applied to every pair
    pub fn global_exclusions(mut self, patterns: Vec<String>) -> Self {
        self.config.global_exclusions = patterns;
        self
    }

    /// Name matching rules
    pub fn path_rules(mut self, rules: PathRules) -> Self {
        self.config.rules = rules;
        self
    }

    /// Shorthand for case-insensitive or case-sensitive rules
    pub fn case_insensitive(self, insensitive: bool) -> Self {
        self.path_rules(if insensitive {
            PathRules::case_insensitive()
        } else {
            PathRules::case_sensitive()
        })
    }

    /// Keep archives whose only change is deleted files
    pub fn record_deletions(mut self, record: bool) -> Self {
        self.config.record_deletions = record;
        self
    }

    /// Read from and restore into a different tree
    pub fn source(mut self, source: Arc<dyn SourceProvider>) -> Self {
        self.source = source;
        self
    }

    /// How to choose between several versions when no index is given
    pub fn version_selector(mut self, selector: Arc<dyn VersionSelector>) -> Self {
        self.selector = selector;
        self
    }

    /// Take global exclusions from a registry and embed it in archives
    pub fn registry(mut self, registry: &Registry) -> Self {
        self.config.global_exclusions = registry.global_exclusions().to_vec();
        self.config.registry_text = Some(registry.render());
        self
    }

    /// Report indexing progress
    pub fn progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Finish configuration
    pub fn build(self) -> Backchain {
        Backchain {
            config: self.config,
            source: self.source,
            selector: self.selector,
            progress: self.progress,
        }
    }
}

impl Default for BackchainBuilder {
    fn default() -> Self {
        Self::new()
    }
}
