//! # Backchain - Incremental, content-addressed directory backups
//!
//! Backchain backs up directory trees into a chain of timestamped tar.gz
//! archives. Each archive stores only the files whose content changed since
//! the previous archive, plus a full index of the tree at that moment. Any
//! file, folder or whole tree can be restored to any recorded version.
//!
//! ## Overview
//!
//! - Index a source tree into a [`Snapshot`]: every directory and every file
//!   with its content digest, honoring glob exclusions
//! - Diff the new snapshot against the index of the newest archive
//! - Write `<timestamp>_backup.tar.gz` holding the changed files, the index
//!   (member `.index`) and the configuration that produced it (member
//!   `.backpy`)
//! - Search a chain for every distinct version of a name and restore one,
//!   in place or under an alternate root
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use backchain::{Backchain, DirectoryPair};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backchain = Backchain::new();
//! let pair = DirectoryPair::new("/home/me/project", "/mnt/backups/project");
//!
//! // First run stores everything, later runs only what changed
//! let outcome = backchain.backup(&pair)?;
//! println!("{} files stored in {:?}", outcome.files_added, outcome.archive);
//!
//! // Newest version of one file
//! backchain.restore(&[pair.clone()], &["src/main.rs".to_string()], Some(0), None)?;
//!
//! // Everything, into a scratch directory
//! backchain.restore(&[pair], &[], None, Some("/tmp/restored".as_ref()))?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Advanced Usage
//!
//! ### Registry driven configuration
//!
//! ```rust,no_run
//! use backchain::{Backchain, PathRules, Registry};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Registry::load("/home/me/.backchain".as_ref(), PathRules::platform())?;
//! let backchain = Backchain::builder()
//!     .registry(&registry)
//!     .record_deletions(true)
//!     .build();
//!
//! for result in backchain.backup_all(registry.pairs()) {
//!     if let Err(e) = result {
//!         eprintln!("{}", e.user_message());
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Choosing between versions
//!
//! ```rust,no_run
//! use backchain::{Backchain, DirectoryPair};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let backchain = Backchain::new();
//! # let pairs = vec![DirectoryPair::new("/src", "/dst")];
//! let matches = backchain.versions(&pairs, "notes.txt");
//! for (i, backup) in matches.files.iter().enumerate() {
//!     println!("[{}] {}", i, backup.file_name());
//! }
//! // Index 0 is the newest version
//! backchain.restore(&pairs, &["notes.txt".to_string()], Some(1), None)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Concepts
//!
//! ### Chains
//!
//! All archives in one destination directory form a chain, ordered by the
//! timestamp in their file names. An archive's index always describes the
//! complete tree, but its tar members only hold files that changed. The
//! bytes for a given version therefore live in the oldest archive of the run
//! of archives that record the same digest.
//!
//! ### Digests
//!
//! Local files are identified by the SHA-256 of their content. Trees behind a
//! remote [`SourceProvider`] may use a surrogate digest derived from path,
//! size and modification time instead; the index records which kind it holds.
//!
//! ### Name resolution
//!
//! Restore accepts full paths, trailing path fragments, folder names and
//! whole registered sources. See [`restore`] for the search passes and how an
//! ambiguous request is resolved.
//!
//! ## Error Handling
//!
//! All fallible operations return `Result<T, BackchainError>`. Indexing and
//! bulk operations log and skip individual unreadable files instead of
//! failing; errors are reserved for conditions the caller must act on, such
//! as an unwritable destination or an ambiguous version request.
//!
//! ## Module Organization
//!
//! - [`backchain`]: The [`Backchain`] façade and its builder
//! - [`file_tracking`]: Tree indexing
//! - [`snapshot`]: Recorded state of one tree
//! - [`diff`]: Changed and missing files between snapshots
//! - [`index`]: Text form of a snapshot
//! - [`archive`]: Archive writing, reading and chain listing
//! - [`restore`]: Version search and restoration
//! - [`registry`]: Persistent list of directory pairs and exclusions
//! - [`source`]: Local and in-memory source trees
//! - [`exclusion`]: Glob exclusion matching
//! - [`paths`]: Member names and case rules
//! - [`types`]: Common types
//! - [`error`]: Error types

// Public API modules
pub mod archive;
pub mod backchain;
pub mod config_file;
pub mod diff;
pub mod error;
pub mod exclusion;
pub mod file_tracking;
pub mod index;
pub mod paths;
pub mod registry;
pub mod restore;
pub mod snapshot;
pub mod source;
pub mod types;
pub mod utils;

// Re-export main types for convenience
pub use archive::{list_backups, read_backup, Backup};
pub use backchain::{Backchain, BackchainBuilder};
pub use error::{BackchainError, Result};
pub use paths::PathRules;
pub use registry::Registry;
pub use restore::{FixedSelection, RequireExplicit, SearchMatches, VersionSelector};
pub use snapshot::Snapshot;
pub use source::{LocalSource, MemorySource, SourceProvider};
pub use types::*;
