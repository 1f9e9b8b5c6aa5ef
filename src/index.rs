//! `.index` serialization
//!
//! Every archive starts with an `.index` member holding the full
//! [`Snapshot`] it materializes. The current layout is sectioned:
//!
//! ```text
//! [schema=2]
//! [surrogate=false]
//! [root=/src/one]
//! [exclusions]
//! */node_modules*
//! [dirs]
//! /src/one
//! /src/one/four
//! [files]
//! /src/one/four/five@@@9f86d0...
//! ```
//!
//! Two older layouts are still read: a flat file with the directory list, a
//! `# files` sentinel and then the file lines, and the same flat body preceded
//! by an `[adb=True]` flag marking surrogate digests. Neither carries the root,
//! so it is taken to be the shortest recorded directory.

use crate::config_file::{ConfigFile, DEFAULT_SECTION};
use crate::error::{BackchainError, Result};
use crate::snapshot::Snapshot;
use crate::types::DigestMode;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tracing::debug;

/// Current `.index` schema
pub const SCHEMA_VERSION: u32 = 2;

/// Separator between a file path and its digest
pub const DIGEST_SEPARATOR: &str = "@@@";

/// Sentinel between directories and files in the flat layout
pub const FILES_SENTINEL: &str = "# files";

/// Render a snapshot in the current layout
pub fn serialize(snapshot: &Snapshot) -> String {
    let mut file = ConfigFile::new();
    file.set_param("schema", SCHEMA_VERSION.to_string());
    file.set_param(
        "surrogate",
        (snapshot.digest_mode() == DigestMode::Surrogate).to_string(),
    );
    file.set_param("root", snapshot.root().to_string_lossy());
    file.set_section("exclusions", snapshot.exclusions().to_vec());
    file.set_section(
        "dirs",
        snapshot
            .dirs()
            .iter()
            .map(|d| d.to_string_lossy().into_owned())
            .collect(),
    );
    file.set_section(
        "files",
        snapshot
            .files()
            .iter()
            .map(|(path, digest)| format!("{}{}{}", path.to_string_lossy(), DIGEST_SEPARATOR, digest))
            .collect(),
    );
    file.render()
}

/// Parse any supported layout back into a snapshot
pub fn deserialize(text: &str) -> Result<Snapshot> {
    let file = ConfigFile::parse(text);

    if let Some(schema) = file.param("schema") {
        let version: u32 = schema
            .trim()
            .parse()
            .map_err(|_| BackchainError::InvalidIndexFile(format!("bad schema '{}'", schema)))?;
        if version > SCHEMA_VERSION {
            return Err(BackchainError::InvalidIndexFile(format!(
                "schema {} is newer than supported {}",
                version, SCHEMA_VERSION
            )));
        }
    }

    let surrogate = file
        .param("surrogate")
        .or_else(|| file.param("adb"))
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let mut dirs = BTreeSet::new();
    let mut files = BTreeMap::new();

    for line in file.section("dirs") {
        dirs.insert(PathBuf::from(line));
    }
    for line in file.section("files") {
        insert_file_line(&mut files, line)?;
    }

    // Flat body: directories, sentinel, files
    let mut in_files = false;
    for line in file.section(DEFAULT_SECTION) {
        if line.trim_end() == FILES_SENTINEL {
            in_files = true;
        } else if in_files {
            insert_file_line(&mut files, line)?;
        } else {
            dirs.insert(PathBuf::from(line));
        }
    }

    let root = match file.param("root") {
        Some(root) => PathBuf::from(root),
        None => legacy_root(&dirs, &files),
    };

    debug!(
        "Parsed index: {} dirs, {} files, root {:?}",
        dirs.len(),
        files.len(),
        root
    );

    Ok(Snapshot::new(
        root,
        dirs,
        files,
        file.section("exclusions").to_vec(),
        if surrogate {
            DigestMode::Surrogate
        } else {
            DigestMode::Content
        },
    ))
}

fn insert_file_line(files: &mut BTreeMap<PathBuf, String>, line: &str) -> Result<()> {
    let (path, digest) = line
        .rsplit_once(DIGEST_SEPARATOR)
        .ok_or_else(|| BackchainError::InvalidIndexFile(format!("file line without digest: '{}'", line)))?;
    files.insert(PathBuf::from(path), digest.to_string());
    Ok(())
}

fn legacy_root(dirs: &BTreeSet<PathBuf>, files: &BTreeMap<PathBuf, String>) -> PathBuf {
    if let Some(shortest) = dirs.iter().min_by_key(|d| d.components().count()) {
        // Older indexes omit the root itself, so its children are the shortest entries
        let has_siblings = dirs
            .iter()
            .filter(|d| d.components().count() == shortest.components().count())
            .count()
            > 1;
        return match (has_siblings, shortest.parent()) {
            (true, Some(parent)) => parent.to_path_buf(),
            _ => shortest.clone(),
        };
    }
    files
        .keys()
        .next()
        .and_then(|f| f.parent())
        .map(PathBuf::from)
        .unwrap_or_default()
}
