//! Sectioned text files
//!
//! Both the `.index` member and the directory-pair registry use the same
//! line-oriented layout:
//!
//! ```text
//! [schema=2]          <- parameter: "[key=value]"
//! [dirs]              <- section header
//! /src/one
//! /src/one/four
//! [files]
//! /src/one/two@@@3f2a...
//! ```
//!
//! Lines that appear before any header belong to the `default` section, which
//! is how older files without headers are read. Blank lines are ignored; other
//! lines are kept byte for byte apart from a trailing `\r`, since paths may
//! end in spaces.

use crate::error::Result;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Section that holds lines appearing before any header
pub const DEFAULT_SECTION: &str = "default";

/// Parsed contents of a sectioned file, preserving order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    params: Vec<(String, String)>,
    sections: Vec<(String, Vec<String>)>,
}

impl ConfigFile {
    /// Create an empty file
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse file contents
    pub fn parse(text: &str) -> Self {
        let mut file = Self::new();
        let mut current = DEFAULT_SECTION.to_string();

        for raw in text.lines() {
            let line = raw.strip_suffix('\r').unwrap_or(raw);
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(header) = trimmed.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                match header.split_once('=') {
                    Some((key, value)) => file.set_param(key.trim(), value),
                    None => {
                        current = header.to_string();
                        file.section_mut(&current);
                    }
                }
                continue;
            }
            file.section_mut(&current).push(line.to_string());
        }

        file
    }

    /// Read and parse a file; a missing file reads as empty
    pub fn read(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Value of a `[key=value]` parameter
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set or replace a parameter
    pub fn set_param(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.params.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.params.push((key.to_string(), value)),
        }
    }

    /// Lines of a section (empty if absent)
    pub fn section(&self, name: &str) -> &[String] {
        self.sections
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, lines)| lines.as_slice())
            .unwrap_or(&[])
    }

    /// Mutable lines of a section, creating it at the end if absent
    pub fn section_mut(&mut self, name: &str) -> &mut Vec<String> {
        let position = match self.sections.iter().position(|(n, _)| n == name) {
            Some(position) => position,
            None => {
                self.sections.push((name.to_string(), Vec::new()));
                self.sections.len() - 1
            }
        };
        &mut self.sections[position].1
    }

    /// Replace a section's lines
    pub fn set_section(&mut self, name: &str, lines: Vec<String>) {
        *self.section_mut(name) = lines;
    }

    /// Render back to text: parameters first, then sections in order
    ///
    /// An empty `default` section is omitted so rendering a headered file
    /// does not grow a spurious header.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.params {
            out.push_str(&format!("[{}={}]\n", key, value));
        }
        for (name, lines) in &self.sections {
            if name == DEFAULT_SECTION && lines.is_empty() {
                continue;
            }
            out.push_str(&format!("[{}]\n", name));
            for line in lines {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }

    /// Atomically write the rendered file
    pub fn write(&self, path: &Path) -> Result<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;
        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        temp.write_all(self.render().as_bytes())?;
        temp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}
