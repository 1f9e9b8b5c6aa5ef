//! Source providers: where snapshots read from and restores write to
//!
//! The engine never touches the filesystem directly when indexing or
//! restoring. It goes through a [`SourceProvider`], which lets the same
//! snapshot, differ and restore code drive a local directory tree
//! ([`LocalSource`]) or a tree reached some other way, such as a device over a
//! bridge. [`MemorySource`] models the latter: it fingerprints files by
//! metadata instead of content and hides paths the device should not export.
//!
//! ```rust
//! use backchain::source::{MemorySource, SourceProvider};
//! use std::path::Path;
//!
//! let device = MemorySource::new();
//! device.add_file("/sdcard/DCIM/a.jpg", b"jpeg bytes");
//! device.add_dir("/sdcard/app/cache");
//!
//! assert!(device.stat(Path::new("/sdcard/DCIM/a.jpg")).is_some());
//! assert!(!device.is_visible(Path::new("/sdcard/app/cache")));
//! ```

use crate::error::{BackchainError, Result};
use crate::types::DigestMode;
use crate::utils::{self, hash_data, hash_file_content, surrogate_digest};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// Kind of a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file (or a link resolving to one)
    File,
    /// Directory
    Dir,
    /// Anything else: sockets, devices, links to directories, broken links
    Other,
}

/// Metadata about one entry of a source tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    /// Absolute path of the entry
    pub path: PathBuf,
    /// Entry kind
    pub kind: EntryKind,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Modification time in seconds since the Unix epoch
    pub modified: i64,
}

impl SourceEntry {
    /// Check if this entry is a regular file
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    /// Check if this entry is a directory
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }
}

/// Access to a tree of files that can be indexed and restored into
pub trait SourceProvider: Send + Sync + fmt::Debug {
    /// Whether paths refer to the local filesystem
    fn is_local(&self) -> bool;

    /// How digests of this source are computed
    fn digest_mode(&self) -> DigestMode;

    /// Whether the provider exposes this path at all
    fn is_visible(&self, _path: &Path) -> bool {
        true
    }

    /// Metadata for a path, `None` if it does not exist
    fn stat(&self, path: &Path) -> Option<SourceEntry>;

    /// Direct children of a directory
    fn list(&self, dir: &Path) -> Result<Vec<SourceEntry>>;

    /// Full contents of a file
    fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Replace a file's contents, creating parent directories as needed
    fn write(&self, path: &Path, bytes: &[u8], mode: Option<u32>) -> Result<()>;

    /// Create a directory and all of its parents
    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Path on the local filesystem that can be streamed into an archive
    fn local_path(&self, path: &Path) -> Option<PathBuf> {
        if self.is_local() {
            Some(path.to_path_buf())
        } else {
            None
        }
    }

    /// Digest of a file according to [`digest_mode`](SourceProvider::digest_mode)
    fn digest(&self, path: &Path) -> Result<String> {
        match self.digest_mode() {
            DigestMode::Content => Ok(hash_data(&self.read(path)?)),
            DigestMode::Surrogate => {
                let entry = self.stat(path).ok_or_else(|| BackchainError::SourceUnavailable {
                    path: path.to_path_buf(),
                })?;
                Ok(surrogate_digest(path, entry.size, entry.modified))
            }
        }
    }
}

/// The local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSource;

impl LocalSource {
    /// Create a local source
    pub fn new() -> Self {
        Self
    }

    fn entry_for(path: &Path, metadata: &fs::Metadata) -> SourceEntry {
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let file_type = metadata.file_type();
        let (kind, size) = if file_type.is_symlink() {
            // Links to files are followed, links to directories are not
            match fs::metadata(path) {
                Ok(resolved) if resolved.is_file() => (EntryKind::File, resolved.len()),
                _ => (EntryKind::Other, 0),
            }
        } else if file_type.is_dir() {
            (EntryKind::Dir, 0)
        } else if file_type.is_file() {
            (EntryKind::File, metadata.len())
        } else {
            (EntryKind::Other, 0)
        };

        SourceEntry {
            path: path.to_path_buf(),
            kind,
            size,
            modified,
        }
    }
}

/// Keep the entries that could be read, warning about the rest
fn skip_unreadable<E: fmt::Display>(
    dir: &Path,
    results: impl IntoIterator<Item = std::result::Result<SourceEntry, E>>,
) -> Vec<SourceEntry> {
    results
        .into_iter()
        .filter_map(|result| match result {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable entry in {:?}: {}", dir, e);
                None
            }
        })
        .collect()
}

impl SourceProvider for LocalSource {
    fn is_local(&self) -> bool {
        true
    }

    fn digest_mode(&self) -> DigestMode {
        DigestMode::Content
    }

    fn stat(&self, path: &Path) -> Option<SourceEntry> {
        fs::symlink_metadata(path)
            .ok()
            .map(|metadata| Self::entry_for(path, &metadata))
    }

    /// Entries that vanish or cannot be read are skipped; only a failure to
    /// read `dir` itself is an error
    fn list(&self, dir: &Path) -> Result<Vec<SourceEntry>> {
        let mut results = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name()
        {
            match entry {
                Err(e) if e.path() == Some(dir) => return Err(e.into()),
                Err(e) => results.push(Err(e)),
                Ok(entry) => results.push(
                    entry
                        .metadata()
                        .map(|metadata| Self::entry_for(entry.path(), &metadata)),
                ),
            }
        }
        Ok(skip_unreadable(dir, results))
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(fs::read(path)?)
    }

    fn write(&self, path: &Path, bytes: &[u8], mode: Option<u32>) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| BackchainError::internal(format!("{:?} has no parent", path)))?;
        fs::create_dir_all(parent)?;

        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        temp.write_all(bytes)?;
        temp.flush()?;
        temp.persist(path).map_err(|e| BackchainError::Io(e.error))?;

        if let Some(mode) = mode {
            utils::set_permissions(path, mode)?;
        }
        trace!("Wrote {} bytes to {:?}", bytes.len(), path);
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn digest(&self, path: &Path) -> Result<String> {
        hash_file_content(path)
    }
}

#[derive(Debug, Clone)]
enum MemoryNode {
    Dir,
    File { bytes: Vec<u8>, modified: i64 },
}

#[derive(Debug, Default)]
struct MemoryTree {
    nodes: BTreeMap<PathBuf, MemoryNode>,
    clock: i64,
}

impl MemoryTree {
    fn tick(&mut self) -> i64 {
        self.clock += 1;
        self.clock
    }

    fn insert_parents(&mut self, path: &Path) {
        for ancestor in path.ancestors().skip(1) {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            self.nodes
                .entry(ancestor.to_path_buf())
                .or_insert(MemoryNode::Dir);
        }
    }
}

/// An in-memory tree standing in for a remote device
///
/// Digests are surrogates built from path, size and a logical modification
/// clock that advances on every write. Paths under a skip prefix, and any
/// directory named `cache`, are invisible to indexing.
#[derive(Debug, Default)]
pub struct MemorySource {
    tree: Mutex<MemoryTree>,
    skip_prefixes: Vec<PathBuf>,
}

impl MemorySource {
    /// Create an empty device
    pub fn new() -> Self {
        Self::default()
    }

    /// Hide everything under these prefixes
    pub fn with_skip_prefixes(mut self, prefixes: Vec<PathBuf>) -> Self {
        self.skip_prefixes = prefixes;
        self
    }

    /// Add a directory (and its parents)
    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut tree = self.tree.lock();
        tree.insert_parents(path);
        tree.nodes.insert(path.to_path_buf(), MemoryNode::Dir);
    }

    /// Add or replace a file, advancing its modification clock
    pub fn add_file(&self, path: impl AsRef<Path>, bytes: &[u8]) {
        let path = path.as_ref();
        let mut tree = self.tree.lock();
        tree.insert_parents(path);
        let modified = tree.tick();
        tree.nodes.insert(
            path.to_path_buf(),
            MemoryNode::File {
                bytes: bytes.to_vec(),
                modified,
            },
        );
    }

    /// Remove a file or a whole subtree
    pub fn remove(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut tree = self.tree.lock();
        tree.nodes.retain(|p, _| !p.starts_with(path));
    }

    /// Contents of a file, if present
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        match self.tree.lock().nodes.get(path.as_ref()) {
            Some(MemoryNode::File { bytes, .. }) => Some(bytes.clone()),
            _ => None,
        }
    }

    fn entry(path: &Path, node: &MemoryNode) -> SourceEntry {
        match node {
            MemoryNode::Dir => SourceEntry {
                path: path.to_path_buf(),
                kind: EntryKind::Dir,
                size: 0,
                modified: 0,
            },
            MemoryNode::File { bytes, modified } => SourceEntry {
                path: path.to_path_buf(),
                kind: EntryKind::File,
                size: bytes.len() as u64,
                modified: *modified,
            },
        }
    }
}

impl SourceProvider for MemorySource {
    fn is_local(&self) -> bool {
        false
    }

    fn digest_mode(&self) -> DigestMode {
        DigestMode::Surrogate
    }

    fn is_visible(&self, path: &Path) -> bool {
        if self.skip_prefixes.iter().any(|prefix| path.starts_with(prefix)) {
            return false;
        }
        let is_cache_dir = path.file_name().map(|n| n == "cache").unwrap_or(false)
            && matches!(self.tree.lock().nodes.get(path), Some(MemoryNode::Dir));
        !is_cache_dir
    }

    fn stat(&self, path: &Path) -> Option<SourceEntry> {
        self.tree
            .lock()
            .nodes
            .get(path)
            .map(|node| Self::entry(path, node))
    }

    fn list(&self, dir: &Path) -> Result<Vec<SourceEntry>> {
        let tree = self.tree.lock();
        match tree.nodes.get(dir) {
            Some(MemoryNode::Dir) => {}
            _ => {
                return Err(BackchainError::SourceUnavailable {
                    path: dir.to_path_buf(),
                })
            }
        }
        Ok(tree
            .nodes
            .iter()
            .filter(|(path, _)| path.parent() == Some(dir))
            .map(|(path, node)| Self::entry(path, node))
            .collect())
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.contents(path).ok_or_else(|| BackchainError::SourceUnavailable {
            path: path.to_path_buf(),
        })
    }

    fn write(&self, path: &Path, bytes: &[u8], _mode: Option<u32>) -> Result<()> {
        debug!("Pushing {} bytes to {:?}", bytes.len(), path);
        self.add_file(path, bytes);
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.add_dir(path);
        Ok(())
    }
}
