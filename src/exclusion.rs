//! Exclusion rules
//!
//! Exclusions are shell-style globs matched against the *full* path of every
//! file and directory the indexer visits. `*` crosses separators, so
//! `*/node_modules*` excludes a `node_modules` directory at any depth and
//! `*.tmp` excludes temporary files anywhere. Backslash is an ordinary
//! character, as it is in Windows paths. Matching follows the configured
//! [`PathRules`]: case-insensitive on Windows, exact elsewhere.

use crate::error::{BackchainError, Result};
use crate::paths::PathRules;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::Path;
use tracing::warn;

/// A compiled set of exclusion globs
#[derive(Debug, Clone)]
pub struct ExclusionSet {
    patterns: Vec<String>,
    set: GlobSet,
}

impl ExclusionSet {
    /// Compile `patterns`, skipping (and logging) any that are invalid
    pub fn new(patterns: &[String], rules: PathRules) -> Self {
        let mut builder = GlobSetBuilder::new();
        let mut accepted = Vec::with_capacity(patterns.len());

        for pattern in patterns.iter().filter(|p| !p.is_empty()) {
            match compile(pattern, rules) {
                Ok(glob) => {
                    builder.add(glob);
                    accepted.push(pattern.clone());
                }
                Err(e) => warn!("Invalid exclusion pattern '{}': {}", pattern, e),
            }
        }

        let set = builder.build().unwrap_or_else(|e| {
            warn!("Failed to build exclusion set: {}", e);
            GlobSet::empty()
        });

        Self {
            patterns: accepted,
            set,
        }
    }

    /// Whether `path` matches any exclusion
    pub fn is_excluded(&self, path: &Path) -> bool {
        !self.patterns.is_empty() && self.set.is_match(path.to_string_lossy().as_ref())
    }
}

/// Validate a single pattern without building a set
pub fn validate_pattern(pattern: &str, rules: PathRules) -> Result<()> {
    compile(pattern, rules).map(|_| ())
}

fn compile(pattern: &str, rules: PathRules) -> Result<globset::Glob> {
    GlobBuilder::new(pattern)
        .case_insensitive(rules.is_case_insensitive())
        .literal_separator(false)
        .backslash_escape(false)
        .build()
        .map_err(|e| BackchainError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.kind().to_string(),
        })
}
