//! Directory-pair registry
//!
//! The registry is a small sectioned text file listing what to back up:
//!
//! ```text
//! [backpy version]
//! 0.3.0
//! [default]
//! /home/me/docs,/mnt/backup/docs,*/drafts*
//! /home/me/photos,/mnt/backup/photos
//! [global skips]
//! *.tmp,*/.cache*
//! ```
//!
//! Each `default` row is `source,destination[,exclusion...]`. The global skip
//! list applies to every pair. The rendered registry is also embedded in every
//! archive as `.backpy`, so the configuration that produced an archive travels
//! with it.

use crate::config_file::{ConfigFile, DEFAULT_SECTION};
use crate::error::{BackchainError, Result};
use crate::exclusion::validate_pattern;
use crate::paths::PathRules;
use crate::types::DirectoryPair;
use crate::utils::absolutize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Section holding the version that created the registry
pub const VERSION_SECTION: &str = "backpy version";

/// Section holding the global exclusion list
pub const GLOBAL_SKIPS_SECTION: &str = "global skips";

/// Ordered directory pairs plus global exclusions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    version: Option<String>,
    pairs: Vec<DirectoryPair>,
    global_exclusions: Vec<String>,
    rules: PathRules,
}

impl Registry {
    /// Create an empty registry
    pub fn new(rules: PathRules) -> Self {
        Self {
            rules,
            ..Default::default()
        }
    }

    /// Parse registry text
    pub fn parse(text: &str, rules: PathRules) -> Self {
        Self::from_config(&ConfigFile::parse(text), rules)
    }

    fn from_config(file: &ConfigFile, rules: PathRules) -> Self {
        let mut pairs = Vec::new();
        for line in file.section(DEFAULT_SECTION) {
            let mut fields = line.split(',').map(str::trim);
            match (fields.next(), fields.next()) {
                (Some(source), Some(destination)) if !destination.is_empty() => {
                    pairs.push(
                        DirectoryPair::new(source, destination)
                            .with_exclusions(fields.filter(|f| !f.is_empty()).map(String::from).collect()),
                    );
                }
                _ => warn!("Bad registry entry: {}", line),
            }
        }

        let global_exclusions = file
            .section(GLOBAL_SKIPS_SECTION)
            .iter()
            .flat_map(|line| line.split(','))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        Self {
            version: file.section(VERSION_SECTION).first().cloned(),
            pairs,
            global_exclusions,
            rules,
        }
    }

    /// Load a registry file; a missing file is an empty registry
    pub fn load(path: &Path, rules: PathRules) -> Result<Self> {
        debug!("Reading registry {:?}", path);
        Ok(Self::from_config(&ConfigFile::read(path)?, rules))
    }

    /// Load a registry, stamping and saving the version if it has none
    pub fn init(path: &Path, rules: PathRules) -> Result<Self> {
        let mut registry = Self::load(path, rules)?;
        if registry.version.is_none() {
            info!("Creating registry {:?}", path);
            registry.version = Some(env!("CARGO_PKG_VERSION").to_string());
            registry.save(path)?;
        }
        Ok(registry)
    }

    /// Write the registry atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        self.to_config().write(path)
    }

    fn to_config(&self) -> ConfigFile {
        let mut file = ConfigFile::new();
        if let Some(version) = &self.version {
            file.set_section(VERSION_SECTION, vec![version.clone()]);
        }
        file.set_section(
            DEFAULT_SECTION,
            self.pairs
                .iter()
                .map(|pair| {
                    let mut fields = vec![
                        pair.source.to_string_lossy().into_owned(),
                        pair.destination.to_string_lossy().into_owned(),
                    ];
                    fields.extend(pair.exclusions.iter().cloned());
                    fields.join(",")
                })
                .collect(),
        );
        if !self.global_exclusions.is_empty() {
            file.set_section(GLOBAL_SKIPS_SECTION, vec![self.global_exclusions.join(",")]);
        }
        file
    }

    /// Registry text as stored in `.backpy`
    pub fn render(&self) -> String {
        self.to_config().render()
    }

    /// Version that created the registry
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Registered pairs in order
    pub fn pairs(&self) -> &[DirectoryPair] {
        &self.pairs
    }

    /// Exclusions applied to every pair
    pub fn global_exclusions(&self) -> &[String] {
        &self.global_exclusions
    }

    /// Position of the pair with this source and destination
    pub fn index_of(&self, source: &Path, destination: &Path) -> Option<usize> {
        self.pairs.iter().position(|pair| {
            self.rules.paths_equal(&pair.source, source)
                && self.rules.paths_equal(&pair.destination, destination)
        })
    }

    fn find_pair(&self, source: &Path, destination: &Path) -> Result<usize> {
        if let Some(i) = self.index_of(source, destination) {
            return Ok(i);
        }
        self.index_of(&absolutize(source)?, &absolutize(destination)?)
            .ok_or_else(|| {
                BackchainError::NotFound(format!("{} -> {}", source.display(), destination.display()))
            })
    }

    /// Register a new pair
    ///
    /// Paths are made absolute. The source must exist; the destination is
    /// created if needed. Returns the new pair's position.
    pub fn add_pair(&mut self, source: &Path, destination: &Path) -> Result<usize> {
        let source = absolutize(source)?;
        let destination = absolutize(destination)?;

        if self.index_of(&source, &destination).is_some() {
            return Err(BackchainError::registry(format!(
                "{} -> {} is already registered",
                source.display(),
                destination.display()
            )));
        }
        if !source.exists() {
            return Err(BackchainError::SourceUnavailable { path: source });
        }
        if !destination.exists() {
            warn!("Destination {:?} not found, creating directory", destination);
            fs::create_dir_all(&destination)
                .map_err(|_| BackchainError::DestinationUnavailable { path: destination.clone() })?;
        }

        info!("Adding {:?} -> {:?}", source, destination);
        self.pairs.push(DirectoryPair::new(source, destination));
        Ok(self.pairs.len() - 1)
    }

    /// Remove the pair with this source and destination
    pub fn remove_pair(&mut self, source: &Path, destination: &Path) -> Result<DirectoryPair> {
        let index = self.find_pair(source, destination)?;
        Ok(self.pairs.remove(index))
    }

    /// Remove the pair at a zero-based position
    pub fn remove_pair_at(&mut self, index: usize) -> Result<DirectoryPair> {
        if index >= self.pairs.len() {
            return Err(BackchainError::NotFound(format!("registry entry {}", index + 1)));
        }
        Ok(self.pairs.remove(index))
    }

    /// Add exclusions to one pair
    ///
    /// With `contains`, a pattern without a leading or trailing `*` is wrapped
    /// as `*pattern*`. A pattern that is already present aborts the whole
    /// call; one equal to the pair's source is skipped.
    pub fn add_exclusions(
        &mut self,
        source: &Path,
        destination: &Path,
        patterns: &[String],
        contains: bool,
    ) -> Result<Vec<String>> {
        let index = self.find_pair(source, destination)?;
        let rules = self.rules;

        let mut prepared = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let pattern = if contains && !pattern.starts_with('*') && !pattern.ends_with('*') {
                format!("*{}*", pattern)
            } else {
                pattern.clone()
            };
            if self.pairs[index].exclusions.contains(&pattern) || prepared.contains(&pattern) {
                return Err(BackchainError::registry(format!("{} already added", pattern)));
            }
            validate_pattern(&pattern, rules)?;
            prepared.push(pattern);
        }

        let pair = &mut self.pairs[index];
        let mut added = Vec::new();
        for pattern in prepared {
            if rules.paths_equal(&pair.source, Path::new(&pattern)) {
                warn!("{} would skip the source itself, not added", pattern);
                continue;
            }
            info!("Skipping {} in {:?}", pattern, pair.source);
            pair.exclusions.push(pattern.clone());
            added.push(pattern);
        }
        Ok(added)
    }

    /// Add global exclusions (comma-separated values are split)
    pub fn add_global_exclusions(&mut self, patterns: &[String]) -> Result<Vec<String>> {
        let mut added = Vec::new();
        for pattern in split_list(patterns) {
            if self.global_exclusions.iter().any(|p| self.rules.equals(p, &pattern)) {
                debug!("Global skip {} already present", pattern);
                continue;
            }
            validate_pattern(&pattern, self.rules)?;
            self.global_exclusions.push(pattern.clone());
            added.push(pattern);
        }
        Ok(added)
    }

    /// Remove global exclusions; fails if none of them were present
    pub fn remove_global_exclusions(&mut self, patterns: &[String]) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for pattern in split_list(patterns) {
            if let Some(position) = self.global_exclusions.iter().position(|p| *p == pattern) {
                self.global_exclusions.remove(position);
                removed.push(pattern);
            }
        }
        if removed.is_empty() {
            return Err(BackchainError::NotFound(format!(
                "global skip {}",
                patterns.join(",")
            )));
        }
        Ok(removed)
    }
}

fn split_list(patterns: &[String]) -> Vec<String> {
    patterns
        .iter()
        .flat_map(|p| p.split(','))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

/// Default registry location: `$BACKCHAIN_CONFIG`, else `~/.backchain`
pub fn default_registry_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os("BACKCHAIN_CONFIG") {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".backchain"))
}
