//! Restore engine
//!
//! Restoring works on the chain of archives of one or more directory pairs.
//! Because an archive only stores files that changed since its predecessor,
//! the bytes of a given version live in the *oldest* archive of the run of
//! archives recording that digest. [`Restorer::search_across_backups`] walks a
//! chain from newest to oldest and reports exactly those archives, one per
//! distinct version, newest first. Index `0` is therefore always the newest
//! version.
//!
//! [`Restorer::find_file_or_folder`] resolves a user-supplied name with four
//! increasingly loose passes:
//!
//! | Pass | Matches | Action |
//! |------|---------|--------|
//! | 0 | name equals a pair's source | whole-folder restore of every archive, oldest first |
//! | 1 | name contains, or is contained in, a pair's source | exact search of that pair |
//! | 2 | pairs not searched in pass 1 | exact search |
//! | 3 | every pair | partial search (trailing path components) |
//!
//! The first pass that finds anything wins. Several file versions require a
//! selection: an explicit index, an automatic pick when exactly one version
//! differs from the file on disk, or the configured [`VersionSelector`].
//!
//! Restores never overwrite a file whose current digest already matches the
//! version being restored, so repeating a restore is harmless.

use crate::archive::{load_chain, Backup};
use crate::error::{BackchainError, Result};
use crate::file_tracking::FileTracker;
use crate::paths::{relocate, MemberName, PathRules};
use crate::source::SourceProvider;
use crate::types::{DirectoryPair, RestoreAction, RestoreReport};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Chooses one of several versions of a file
pub trait VersionSelector: Send + Sync {
    /// Pick an index into `versions` (newest first); `Ok(None)` cancels
    fn select(&self, name: &str, versions: &[Arc<Backup>]) -> Result<Option<usize>>;
}

/// Refuses to guess: ambiguous requests fail with `SelectionRequired`
#[derive(Debug, Clone, Copy, Default)]
pub struct RequireExplicit;

impl VersionSelector for RequireExplicit {
    fn select(&self, name: &str, versions: &[Arc<Backup>]) -> Result<Option<usize>> {
        Err(BackchainError::SelectionRequired {
            name: name.to_string(),
            versions: versions.len(),
        })
    }
}

/// Always answers with the same choice
#[derive(Debug, Clone, Copy)]
pub struct FixedSelection(pub Option<usize>);

impl VersionSelector for FixedSelection {
    fn select(&self, _name: &str, _versions: &[Arc<Backup>]) -> Result<Option<usize>> {
        Ok(self.0)
    }
}

/// Archives matching a name in one or more chains
#[derive(Debug, Clone, Default)]
pub struct SearchMatches {
    /// One archive per distinct file version, newest first
    pub files: Vec<Arc<Backup>>,
    /// Archives whose directory set contains the name, oldest first
    pub folders: Vec<Arc<Backup>>,
}

impl SearchMatches {
    /// Check if nothing matched
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.folders.is_empty()
    }

    fn extend(&mut self, other: SearchMatches) {
        self.files.extend(other.files);
        self.folders.extend(other.folders);
    }
}

type Chain = Arc<Vec<Arc<Backup>>>;

/// Restores files and folders from archive chains
pub struct Restorer<'a> {
    source: &'a dyn SourceProvider,
    rules: PathRules,
    selector: &'a dyn VersionSelector,
    chains: Mutex<HashMap<PathBuf, Chain>>,
}

impl<'a> Restorer<'a> {
    /// Create a restorer writing through `source`
    pub fn new(source: &'a dyn SourceProvider, rules: PathRules, selector: &'a dyn VersionSelector) -> Self {
        Self {
            source,
            rules,
            selector,
            chains: Mutex::new(HashMap::new()),
        }
    }

    /// Archives of `destination`, oldest first, read once per restorer
    pub fn chain(&self, destination: &Path) -> Result<Chain> {
        if let Some(chain) = self.chains.lock().get(destination) {
            return Ok(Arc::clone(chain));
        }
        let chain: Chain = Arc::new(load_chain(destination)?.into_iter().map(Arc::new).collect());
        self.chains
            .lock()
            .insert(destination.to_path_buf(), Arc::clone(&chain));
        Ok(chain)
    }

    fn current_digest(&self, path: &Path) -> Option<String> {
        match self.source.stat(path) {
            Some(entry) if entry.is_file() => self.source.digest(path).ok(),
            _ => None,
        }
    }

    /// Restore one file from `backup`
    ///
    /// `name` may be a full path or a trailing part of one. The file is
    /// written to its recorded location, or under `alt_root` if given.
    pub fn restore_file(&self, backup: &Backup, name: &Path, alt_root: Option<&Path>) -> Result<RestoreAction> {
        let Some((path, digest)) = backup.snapshot.find_file(name, false, &self.rules) else {
            debug!("{:?} is not recorded in {}", name, backup.file_name());
            return Ok(RestoreAction::NotInSnapshot);
        };
        self.restore_resolved(backup, path, Some(digest), alt_root)
    }

    /// Extract `path`; skip if `expected` matches what is on disk
    fn restore_resolved(
        &self,
        backup: &Backup,
        path: &Path,
        expected: Option<&str>,
        alt_root: Option<&Path>,
    ) -> Result<RestoreAction> {
        let dest = relocate(path, alt_root);

        if let Some(expected) = expected {
            let comparable = backup.snapshot.digest_mode() == self.source.digest_mode();
            if comparable && self.current_digest(&dest).as_deref() == Some(expected) {
                debug!("{:?} is unchanged, skipping", dest);
                return Ok(RestoreAction::Unchanged(dest));
            }
        }

        let member = MemberName::from_path(path).member;
        match backup.read_member(&member)? {
            Some((bytes, mode)) => {
                self.source.write(&dest, &bytes, mode)?;
                info!("Restored {:?} from {}", dest, backup.file_name());
                Ok(RestoreAction::Restored(dest))
            }
            None => {
                warn!("{} is not stored in {}", member, backup.file_name());
                Ok(RestoreAction::MemberMissing(member))
            }
        }
    }

    /// Restore every file `backup` records under the folder `name`
    ///
    /// The folder's current state is indexed first; only files that are
    /// missing or differ are extracted. Recorded subdirectories that no longer
    /// exist are recreated, including empty ones.
    pub fn restore_folder(&self, backup: &Backup, name: &Path, alt_root: Option<&Path>) -> Result<RestoreReport> {
        let mut report = RestoreReport::default();
        let Some(dir) = backup.snapshot.find_folder(name, false, &self.rules) else {
            debug!("Folder {:?} is not recorded in {}", name, backup.file_name());
            return Ok(report);
        };

        let target = relocate(dir, alt_root);
        let current = FileTracker::new(target)
            .with_rules(self.rules)
            .quiet(true)
            .scan(self.source);

        for (path, digest) in backup.snapshot.files_under(dir, &self.rules) {
            let dest = relocate(path, alt_root);
            if current.digest_of(&dest) == Some(digest) {
                report.files_unchanged += 1;
                continue;
            }
            match self.restore_resolved(backup, path, None, alt_root) {
                Ok(action) => {
                    if let RestoreAction::MemberMissing(member) = &action {
                        debug!("{} comes from an older archive", member);
                    }
                    report.record(&action);
                }
                Err(e) => {
                    warn!("Could not restore {:?}: {}", path, e);
                    report.warnings.push(format!("{}: {}", path.display(), e));
                }
            }
        }

        for recorded in backup.snapshot.dirs().iter() {
            if !self.rules.path_starts_with(recorded, dir) {
                continue;
            }
            let dest = relocate(recorded, alt_root);
            if self.source.stat(&dest).is_none() {
                self.source.create_dir_all(&dest)?;
                report.directories_created += 1;
            }
        }

        Ok(report)
    }

    /// Find every distinct version of `name` in the chain of `destination`
    #[instrument(skip(self))]
    pub fn search_across_backups(&self, destination: &Path, name: &Path, exact: bool) -> Result<SearchMatches> {
        let chain = self.chain(destination)?;
        let mut matches = SearchMatches::default();
        let mut last_digest: Option<&str> = None;
        let mut last_backup: Option<&Arc<Backup>> = None;

        for backup in chain.iter().rev() {
            let digest = backup.contains_file(name, exact, &self.rules);
            if digest != last_digest {
                if let (Some(previous), Some(holder)) = (last_digest, last_backup) {
                    debug!("Digest {} changed, version held by {}", previous, holder.file_name());
                    matches.files.push(Arc::clone(holder));
                }
                last_digest = digest;
            }
            last_backup = Some(backup);

            if backup.contains_folder(name, exact, &self.rules) {
                matches.folders.push(Arc::clone(backup));
            }
        }
        if let (Some(_), Some(holder)) = (last_digest, last_backup) {
            matches.files.push(Arc::clone(holder));
        }

        matches.folders.reverse();
        debug!(
            "{} file versions, {} folder matches",
            matches.files.len(),
            matches.folders.len()
        );
        Ok(matches)
    }

    fn search_pair(&self, pair: &DirectoryPair, name: &Path, exact: bool) -> SearchMatches {
        match self.search_across_backups(&pair.destination, name, exact) {
            Ok(matches) => matches,
            Err(e) => {
                warn!("Could not search {:?}: {}", pair.destination, e);
                SearchMatches::default()
            }
        }
    }

    /// Search passes 1 to 3; the first pass with any match wins
    pub fn find_versions(&self, pairs: &[DirectoryPair], name: &str) -> SearchMatches {
        let wanted = Path::new(name);
        let mut searched = vec![false; pairs.len()];

        let mut matches = SearchMatches::default();
        for (i, pair) in pairs.iter().enumerate() {
            let source = pair.source.to_string_lossy();
            if self.rules.contains(&source, name) || self.rules.contains(name, &source) {
                debug!("Pass 1: {:?} relates to {:?}", name, pair.source);
                searched[i] = true;
                matches.extend(self.search_pair(pair, wanted, true));
            }
        }
        if !matches.is_empty() {
            return matches;
        }

        for (pair, _) in pairs.iter().zip(&searched).filter(|(_, done)| !**done) {
            debug!("Pass 2: searching {:?}", pair.destination);
            matches.extend(self.search_pair(pair, wanted, true));
        }
        if !matches.is_empty() {
            return matches;
        }

        for pair in pairs {
            debug!("Pass 3: partial search of {:?}", pair.destination);
            matches.extend(self.search_pair(pair, wanted, false));
        }
        matches
    }

    /// Locate `name` across the pairs' chains and restore it
    ///
    /// `index` selects a version (0 is the newest) when several exist.
    #[instrument(skip(self, pairs))]
    pub fn find_file_or_folder(
        &self,
        pairs: &[DirectoryPair],
        name: &str,
        index: Option<usize>,
        alt_root: Option<&Path>,
    ) -> Result<RestoreReport> {
        let mut report = RestoreReport::default();
        if name.is_empty() {
            report.not_found.push(String::new());
            return Ok(report);
        }
        let wanted = Path::new(name);

        // Pass 0: a whole registered source
        for pair in pairs {
            if pair.is_source(wanted, &self.rules) {
                info!("Restoring every backup of {:?}", pair.source);
                for backup in self.chain(&pair.destination)?.iter() {
                    report.merge(self.restore_folder(backup, &pair.source, alt_root)?);
                }
                return Ok(report);
            }
        }

        let matches = self.find_versions(pairs, name);

        if !matches.files.is_empty() {
            let Some(chosen) = self.choose_version(name, &matches.files, index, alt_root)? else {
                info!("Restore of {} cancelled", name);
                report.warnings.push(format!("{}: cancelled", name));
                return Ok(report);
            };
            let backup = &matches.files[chosen];
            let action = self.restore_file(backup, wanted, alt_root)?;
            if let RestoreAction::MemberMissing(member) = &action {
                report
                    .warnings
                    .push(format!("{} is not stored in {}", member, backup.file_name()));
            }
            report.record(&action);
            return Ok(report);
        }

        if !matches.folders.is_empty() {
            for backup in &matches.folders {
                report.merge(self.restore_folder(backup, wanted, alt_root)?);
            }
            return Ok(report);
        }

        warn!("{} not found", name);
        report.not_found.push(name.to_string());
        Ok(report)
    }

    fn choose_version(
        &self,
        name: &str,
        versions: &[Arc<Backup>],
        index: Option<usize>,
        alt_root: Option<&Path>,
    ) -> Result<Option<usize>> {
        if versions.len() == 1 {
            if let Some(i) = index.filter(|i| *i != 0) {
                warn!("Only one version of {} exists, ignoring index {}", name, i);
            }
            return Ok(Some(0));
        }

        for (i, backup) in versions.iter().enumerate() {
            info!("[{}] {}", i, backup.archive_path().display());
        }

        let chosen = match index {
            Some(i) => Some(i),
            None => match self.single_differing_version(name, versions, alt_root) {
                Some(i) => {
                    info!("Only {} differs from the current file, restoring it", versions[i].file_name());
                    Some(i)
                }
                None => self.selector.select(name, versions)?,
            },
        };

        match chosen {
            Some(i) if i >= versions.len() => Err(BackchainError::InvalidSelection {
                index: i,
                available: versions.len(),
            }),
            other => Ok(other),
        }
    }

    /// The one version whose digest differs from the file at its location, if unique
    ///
    /// Each version is compared with the file at its own recorded path, so
    /// versions found in different pairs are judged against their own files.
    /// A file missing on disk differs from every version.
    fn single_differing_version(&self, name: &str, versions: &[Arc<Backup>], alt_root: Option<&Path>) -> Option<usize> {
        let wanted = Path::new(name);
        let mut on_disk: HashMap<PathBuf, Option<String>> = HashMap::new();
        let mut differing = Vec::new();

        for (i, backup) in versions.iter().enumerate() {
            let (path, digest) = backup.snapshot.find_file(wanted, false, &self.rules)?;
            let current = on_disk
                .entry(relocate(path, alt_root))
                .or_insert_with_key(|dest| self.current_digest(dest));
            if current.as_deref() != Some(digest) {
                differing.push(i);
            }
        }
        match differing.as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    /// Restore every pair to the state of its newest readable archive
    ///
    /// Each recorded file is restored at its newest version, then recorded
    /// directories missing on disk are recreated empty.
    #[instrument(skip(self, pairs))]
    pub fn restore_all(&self, pairs: &[DirectoryPair], alt_root: Option<&Path>) -> Result<RestoreReport> {
        let mut report = RestoreReport::default();

        for pair in pairs {
            let chain = match self.chain(&pair.destination) {
                Ok(chain) => chain,
                Err(e) => {
                    warn!("Could not read backups in {:?}: {}", pair.destination, e);
                    report.warnings.push(format!("{}: {}", pair.destination.display(), e));
                    continue;
                }
            };
            let Some(latest) = chain.iter().rev().find(|b| !b.snapshot.is_empty()) else {
                warn!("No backups found in {:?}", pair.destination);
                report.not_found.push(pair.destination.to_string_lossy().into_owned());
                continue;
            };
            info!("Restoring {:?} from {}", pair.source, latest.file_name());

            let single = std::slice::from_ref(pair);
            for path in latest.snapshot.files().keys() {
                let name = path.to_string_lossy();
                match self.find_file_or_folder(single, &name, Some(0), alt_root) {
                    Ok(item) => report.merge(item),
                    Err(e) => {
                        warn!("Could not restore {}: {}", name, e);
                        report.warnings.push(format!("{}: {}", name, e));
                    }
                }
            }

            for dir in latest.snapshot.dirs() {
                let dest = relocate(dir, alt_root);
                if self.source.stat(&dest).is_none() {
                    debug!("Recreating directory {:?}", dest);
                    self.source.create_dir_all(&dest)?;
                    report.directories_created += 1;
                }
            }
        }

        Ok(report)
    }

    /// Restore each requested name, or everything when `names` is empty
    ///
    /// A leading `#n` limits the operation to the n-th pair (1-based). With
    /// several names, a name that is missing or needs a selection becomes a
    /// warning and the rest still run; write failures stop the whole restore.
    pub fn restore(
        &self,
        pairs: &[DirectoryPair],
        names: &[String],
        index: Option<usize>,
        alt_root: Option<&Path>,
    ) -> Result<RestoreReport> {
        let (pairs, names) = match names.first().and_then(|first| parse_pair_selector(first)) {
            Some(n) => match n.checked_sub(1).and_then(|i| pairs.get(i)) {
                Some(pair) => (std::slice::from_ref(pair), &names[1..]),
                None => {
                    warn!("Restore index not valid: #{}", n);
                    let mut report = RestoreReport::default();
                    report.not_found.push(format!("#{}", n));
                    return Ok(report);
                }
            },
            None => (pairs, names),
        };

        if names.is_empty() {
            if let Some(i) = index.filter(|i| *i != 0) {
                warn!("Restoring all files, ignoring index {}", i);
            }
            return self.restore_all(pairs, alt_root);
        }

        if let [name] = names {
            return self.find_file_or_folder(pairs, name, index, alt_root);
        }

        let mut report = RestoreReport::default();
        for name in names {
            match self.find_file_or_folder(pairs, name, index, alt_root) {
                Ok(item) => report.merge(item),
                Err(e) if e.is_not_found() || e.is_recoverable() => {
                    warn!("Could not restore {}: {}", name, e);
                    report.warnings.push(format!("{}: {}", name, e));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }
}

/// Parse a `#n` pair selector
fn parse_pair_selector(arg: &str) -> Option<usize> {
    arg.strip_prefix('#').and_then(|n| n.parse().ok())
}
