//! Archive writer and reader
//!
//! Each backup run produces at most one gzip-compressed tar file named
//! `<timestamp>_backup.tar.gz` in the pair's destination directory. Its members
//! are, in order:
//!
//! 1. `.index` - the full [`Snapshot`] of the source at backup time
//! 2. one member per file that is new or changed since the previous archive,
//!    named by [`MemberName`]
//! 3. `.backpy` - the directory-pair configuration that was in force
//!
//! Archives are written to a temporary file in the destination and renamed
//! into place only once complete, so an interrupted run never leaves a
//! half-written archive in the chain. A run that changes nothing leaves no
//! archive at all.

use crate::diff::SnapshotDiff;
use crate::error::{BackchainError, Result};
use crate::index;
use crate::paths::{MemberName, PathRules};
use crate::snapshot::Snapshot;
use crate::source::SourceProvider;
use crate::types::{BackupOutcome, BackupStatus};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, Header};
use tracing::{debug, error, info, instrument, warn};

/// Member holding the serialized snapshot
pub const INDEX_MEMBER: &str = ".index";

/// Member holding the directory-pair configuration
pub const CONFIG_MEMBER: &str = ".backpy";

/// Suffix shared by every archive file name
pub const ARCHIVE_SUFFIX: &str = "_backup.tar.gz";

/// File name of the archive for `timestamp`
pub fn archive_file_name(timestamp: &str) -> String {
    format!("{}{}", timestamp, ARCHIVE_SUFFIX)
}

/// One archive of a chain, with the snapshot it materializes
#[derive(Debug, Clone)]
pub struct Backup {
    /// Sortable timestamp taken from the file name
    pub timestamp: String,
    /// Destination directory holding the archive
    pub destination: PathBuf,
    /// Snapshot parsed from `.index` (empty if the archive is unreadable)
    pub snapshot: Snapshot,
    file_name: String,
}

impl Backup {
    /// Full path of the archive file
    pub fn archive_path(&self) -> PathBuf {
        self.destination.join(&self.file_name)
    }

    /// Archive file name
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Digest of `name` in this archive's snapshot
    pub fn contains_file(&self, name: &Path, exact: bool, rules: &PathRules) -> Option<&str> {
        self.snapshot.find_file(name, exact, rules).map(|(_, digest)| digest)
    }

    /// Whether this archive's snapshot records the folder `name`
    pub fn contains_folder(&self, name: &Path, exact: bool, rules: &PathRules) -> bool {
        self.snapshot.find_folder(name, exact, rules).is_some()
    }

    /// Bytes and permission bits of a member, `None` if it is not stored here
    pub fn read_member(&self, member: &str) -> Result<Option<(Vec<u8>, Option<u32>)>> {
        let path = self.archive_path();
        let file = File::open(&path).map_err(|_| BackchainError::ArchiveNotFound(path.clone()))?;
        let mut archive = Archive::new(GzDecoder::new(file));

        for entry in archive.entries().map_err(|e| corrupt(&path, e))? {
            let mut entry = entry.map_err(|e| corrupt(&path, e))?;
            if entry.path_bytes().as_ref() != member.as_bytes() {
                continue;
            }
            let mode = entry.header().mode().ok().map(|m| m & 0o7777);
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes).map_err(|e| corrupt(&path, e))?;
            return Ok(Some((bytes, mode)));
        }
        Ok(None)
    }

    /// Names of every member stored in the archive
    pub fn members(&self) -> Result<Vec<String>> {
        let path = self.archive_path();
        let file = File::open(&path).map_err(|_| BackchainError::ArchiveNotFound(path.clone()))?;
        let mut archive = Archive::new(GzDecoder::new(file));
        let mut names = Vec::new();
        for entry in archive.entries().map_err(|e| corrupt(&path, e))? {
            let entry = entry.map_err(|e| corrupt(&path, e))?;
            names.push(String::from_utf8_lossy(entry.path_bytes().as_ref()).into_owned());
        }
        Ok(names)
    }

    /// Directory-pair configuration stored alongside the snapshot
    pub fn pair_config(&self) -> Result<Option<String>> {
        Ok(self
            .read_member(CONFIG_MEMBER)?
            .map(|(bytes, _)| String::from_utf8_lossy(&bytes).into_owned()))
    }
}

fn corrupt(path: &Path, e: impl std::fmt::Display) -> BackchainError {
    BackchainError::CorruptArchive {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

/// Writes new archives into one destination
pub struct ArchiveWriter<'a> {
    destination: &'a Path,
    source: &'a dyn SourceProvider,
    pair_config: String,
    record_deletions: bool,
}

impl<'a> ArchiveWriter<'a> {
    /// Create a writer reading file bytes through `source`
    pub fn new(destination: &'a Path, source: &'a dyn SourceProvider) -> Self {
        Self {
            destination,
            source,
            pair_config: String::new(),
            record_deletions: false,
        }
    }

    /// Text stored as the `.backpy` member
    pub fn with_pair_config(mut self, pair_config: impl Into<String>) -> Self {
        self.pair_config = pair_config.into();
        self
    }

    /// Keep archives whose only change is deleted files
    pub fn record_deletions(mut self, record: bool) -> Self {
        self.record_deletions = record;
        self
    }

    /// Persist `new` and its changes relative to `old` as `<timestamp>_backup.tar.gz`
    #[instrument(skip(self, new, old), fields(destination = %self.destination.display()))]
    pub fn write(&self, new: &Snapshot, old: Option<&Snapshot>, timestamp: &str) -> Result<BackupOutcome> {
        let mut outcome = BackupOutcome {
            archive: None,
            timestamp: timestamp.to_string(),
            files_indexed: new.file_count(),
            files_added: 0,
            files_missing: 0,
            bytes_added: 0,
            status: BackupStatus::EmptySource,
        };

        if new.is_empty() {
            warn!("No files to back up under {:?}", new.root());
            return Ok(outcome);
        }

        fs::create_dir_all(self.destination).map_err(|e| {
            error!("Could not create destination {:?}: {}", self.destination, e);
            BackchainError::DestinationUnavailable {
                path: self.destination.to_path_buf(),
            }
        })?;

        let diff = SnapshotDiff::between(new, old);
        outcome.files_missing = diff.missing.len();
        for path in &diff.missing {
            debug!("No longer present: {:?}", path);
        }

        let keep_deletions = self.record_deletions && !diff.missing.is_empty();
        if diff.changed_count() == 0 && !keep_deletions {
            outcome.status = if diff.has_changes() {
                info!("{} files removed but none added, not recording", diff.missing.len());
                BackupStatus::DeletionsOnlyDiscarded
            } else {
                info!("No changes since the previous backup");
                BackupStatus::NoChanges
            };
            return Ok(outcome);
        }
        debug!("{} added, {} modified", diff.added.len(), diff.modified.len());

        let mut temp = tempfile::NamedTempFile::new_in(self.destination)?;
        {
            let encoder = GzEncoder::new(temp.as_file_mut(), Compression::default());
            let mut builder = Builder::new(encoder);

            append_bytes(&mut builder, INDEX_MEMBER, index::serialize(new).as_bytes(), 0o644)?;

            for path in diff.added.iter().chain(&diff.modified) {
                let member = MemberName::from_path(path).member;
                if let Some(size) = self.append_source_file(&mut builder, path, &member)? {
                    outcome.files_added += 1;
                    outcome.bytes_added += size;
                }
            }

            append_bytes(&mut builder, CONFIG_MEMBER, self.pair_config.as_bytes(), 0o644)?;
            builder.into_inner()?.finish()?;
        }

        if outcome.files_added == 0 && !keep_deletions {
            warn!(
                "None of the {} changed files could be read, discarding archive",
                diff.changed_count()
            );
            outcome.status = BackupStatus::NoChanges;
            return Ok(outcome);
        }

        temp.as_file().sync_all()?;
        let archive_path = self.destination.join(archive_file_name(timestamp));
        temp.persist(&archive_path)
            .map_err(|e| BackchainError::Io(e.error))?;

        info!(
            "Wrote {:?}: {} files stored, {} missing",
            archive_path, outcome.files_added, outcome.files_missing
        );
        outcome.archive = Some(archive_path);
        outcome.status = BackupStatus::Written;
        Ok(outcome)
    }

    /// Append one source file; `Ok(None)` if it could not be read
    fn append_source_file<W: Write>(
        &self,
        builder: &mut Builder<W>,
        path: &Path,
        member: &str,
    ) -> Result<Option<u64>> {
        if let Some(local) = self.source.local_path(path) {
            let mut file = match File::open(&local) {
                Ok(file) => file,
                Err(e) => {
                    warn!("Could not read {:?}, skipping: {}", local, e);
                    return Ok(None);
                }
            };
            let size = file.metadata()?.len();
            builder.append_file(member, &mut file)?;
            return Ok(Some(size));
        }

        // Remote bytes are pulled into memory before being stored
        match self.source.read(path) {
            Ok(bytes) => {
                append_bytes(builder, member, &bytes, 0o644)?;
                Ok(Some(bytes.len() as u64))
            }
            Err(e) => {
                warn!("Could not pull {:?}, skipping: {}", path, e);
                Ok(None)
            }
        }
    }
}

fn append_bytes<W: Write>(builder: &mut Builder<W>, name: &str, bytes: &[u8], mode: u32) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_size(bytes.len() as u64);
    header.set_mode(mode);
    header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
    builder.append_data(&mut header, name, bytes)?;
    Ok(())
}

/// Write `new` (diffed against `old`) as a new archive in `destination`
pub fn write_to_disk(
    new: &Snapshot,
    old: Option<&Snapshot>,
    destination: &Path,
    timestamp: &str,
    source: &dyn SourceProvider,
) -> Result<BackupOutcome> {
    ArchiveWriter::new(destination, source).write(new, old, timestamp)
}

/// Timestamp encoded in an archive file name
pub fn timestamp_of(file_name: &str) -> &str {
    file_name.split('_').next().unwrap_or(file_name)
}

fn load_backup(path: &Path) -> Result<Backup> {
    let file = File::open(path).map_err(|_| BackchainError::ArchiveNotFound(path.to_path_buf()))?;
    let mut archive = Archive::new(GzDecoder::new(file));

    let mut text = None;
    for entry in archive.entries().map_err(|e| corrupt(path, e))? {
        let mut entry = entry.map_err(|e| corrupt(path, e))?;
        if entry.path_bytes().as_ref() == INDEX_MEMBER.as_bytes() {
            let mut contents = String::new();
            entry.read_to_string(&mut contents).map_err(|e| corrupt(path, e))?;
            text = Some(contents);
            break;
        }
    }

    let text = text.ok_or_else(|| BackchainError::MemberNotFound {
        member: INDEX_MEMBER.to_string(),
        archive: path.to_path_buf(),
    })?;
    let snapshot = index::deserialize(&text)?;
    Ok(backup_shell(path, snapshot))
}

fn backup_shell(path: &Path, snapshot: Snapshot) -> Backup {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Backup {
        timestamp: timestamp_of(&file_name).to_string(),
        destination: path.parent().map(Path::to_path_buf).unwrap_or_default(),
        snapshot,
        file_name,
    }
}

/// Read an archive's snapshot
///
/// An unreadable or corrupt archive is logged and comes back with an empty
/// snapshot, so walking a chain can continue past it.
pub fn read_backup(path: &Path) -> Backup {
    match load_backup(path) {
        Ok(backup) => backup,
        Err(e) => {
            error!("Could not read backup {:?}: {}", path, e);
            backup_shell(path, Snapshot::empty(PathBuf::new()))
        }
    }
}

/// Archive file names in `destination`, sorted by timestamp
pub fn list_backups(destination: &Path, newest_first: bool) -> Result<Vec<String>> {
    let entries = match fs::read_dir(destination) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(ARCHIVE_SUFFIX) && entry.file_type()?.is_file() {
            names.push(name);
        }
    }
    names.sort_by(|a, b| timestamp_of(a).cmp(timestamp_of(b)).then_with(|| a.cmp(b)));
    if newest_first {
        names.reverse();
    }
    Ok(names)
}

/// The newest archive in `destination`, if any
pub fn latest_backup(destination: &Path) -> Result<Option<Backup>> {
    Ok(list_backups(destination, true)?
        .first()
        .map(|name| read_backup(&destination.join(name))))
}

/// Every archive in `destination`, oldest first
pub fn load_chain(destination: &Path) -> Result<Vec<Backup>> {
    Ok(list_backups(destination, false)?
        .iter()
        .map(|name| read_backup(&destination.join(name)))
        .collect())
}
