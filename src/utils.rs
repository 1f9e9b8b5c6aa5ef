//! Utility functions for Backchain
//!
//! Hashing, permission handling, timestamp generation and a few formatting
//! helpers shared by the snapshot, archive and restore modules.
//!
//! ## File Hashing
//!
//! ```rust
//! use backchain::utils::{hash_data, surrogate_digest};
//! use std::path::Path;
//!
//! let digest = hash_data(b"Hello, world!");
//! assert_eq!(digest.len(), 64);
//!
//! // Remote sources are fingerprinted from metadata instead of bytes
//! let surrogate = surrogate_digest(Path::new("/sdcard/a.jpg"), 1024, 1_700_000_000);
//! assert_eq!(surrogate.len(), 64);
//! ```
//!
//! ## Timestamps
//!
//! Archive names start with a `%Y%m%d%H%M%S` timestamp. [`next_timestamp`]
//! guarantees the new archive sorts after every existing one, even when two
//! backups complete within the same second.

use crate::error::{BackchainError, Result};
use chrono::{Local, NaiveDateTime, TimeDelta};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Component, Path, PathBuf};

/// Format of archive timestamps
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Hash a file's content using SHA-256
///
/// The file is streamed through an 8KB buffer, so arbitrarily large files
/// are hashed without being loaded into memory.
///
/// # Errors
///
/// - [`BackchainError::Io`] if the file cannot be opened or read
pub fn hash_file_content(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    hash_reader(file)
}

/// Hash everything a reader yields using SHA-256
pub fn hash_reader<R: Read>(mut reader: R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192]; // 8KB buffer

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hash arbitrary data using SHA-256
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Digest derived from a file's path, size and modification time
///
/// Used for sources where reading every byte is too expensive (devices
/// reached over a bridge). Two entries with the same surrogate are treated as
/// unchanged.
pub fn surrogate_digest(path: &Path, size: u64, modified_secs: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    hasher.update(b"\0");
    hasher.update(size.to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(modified_secs.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Set file permissions (Unix mode bits, or the read-only flag on Windows)
#[cfg(unix)]
pub fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// Set file permissions (Unix mode bits, or the read-only flag on Windows)
#[cfg(windows)]
pub fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    let is_readonly = (mode & 0o200) == 0;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(is_readonly);
    fs::set_permissions(path, perms)?;
    Ok(())
}

/// Make a user-supplied path absolute without touching the filesystem
///
/// `.` and `..` components are resolved lexically, so the result never
/// contains either. `..` at the root stays at the root.
pub fn absolutize(path: &Path) -> Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in std::path::absolute(path)?.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if normalized.parent().is_some() {
                    normalized.pop();
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

/// Format bytes as a human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Current local time as an archive timestamp
pub fn timestamp_now() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Parse an archive timestamp
pub fn parse_timestamp(timestamp: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
        .map_err(|e| BackchainError::InvalidTimestamp(format!("{}: {}", timestamp, e)))
}

/// Timestamp for a new archive that sorts strictly after `latest`
///
/// Normally this is the current time. If the newest archive already carries
/// the current second (or a later one), the latest timestamp is bumped by one
/// second instead.
pub fn next_timestamp(latest: Option<&str>) -> String {
    let now = timestamp_now();
    let Some(latest) = latest else {
        return now;
    };
    if now.as_str() > latest {
        return now;
    }
    match parse_timestamp(latest) {
        Ok(parsed) => (parsed + TimeDelta::seconds(1))
            .format(TIMESTAMP_FORMAT)
            .to_string(),
        Err(_) => format!("{}0", latest),
    }
}
