//! Path/name translation and platform-aware matching
//!
//! Archives store members under portable, forward-slash names so a chain
//! written on one platform can be restored on another. [`MemberName`] splits an
//! absolute path into its root component (`/`, `C:\`) and that portable
//! remainder, and recombines them (optionally under an alternate root) when
//! restoring.
//!
//! [`PathRules`] is the single place that knows whether names compare
//! case-insensitively. Everything that matches user input against recorded
//! paths (snapshot lookups, exclusion globs, registry entries, restore search)
//! goes through it.
//!
//! ```rust
//! use backchain::paths::MemberName;
//! use std::path::Path;
//!
//! # #[cfg(unix)]
//! # {
//! let name = MemberName::from_path(Path::new("/src/one/four/five"));
//! assert_eq!(name.root, Path::new("/"));
//! assert_eq!(name.member, "src/one/four/five");
//! assert_eq!(
//!     name.destination(Some(Path::new("/tmp/alt"))),
//!     Path::new("/tmp/alt/src/one/four/five")
//! );
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};

/// An absolute path split into its root and its portable archive member name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberName {
    /// Root component of the original path (`/` on Unix, `C:\` on Windows)
    pub root: PathBuf,
    /// Forward-slash separated remainder, used as the archive member name
    pub member: String,
}

impl MemberName {
    /// Split a platform path into root and member name
    ///
    /// `..` components are resolved against the preceding ones; a member
    /// name never contains them.
    pub fn from_path(path: &Path) -> Self {
        let mut root = String::new();
        let mut parts: Vec<String> = Vec::new();

        for component in path.components() {
            match component {
                Component::Prefix(prefix) => root.push_str(&prefix.as_os_str().to_string_lossy()),
                Component::RootDir => root.push(MAIN_SEPARATOR),
                Component::CurDir => {}
                Component::ParentDir => {
                    parts.pop();
                }
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            }
        }

        Self {
            root: PathBuf::from(root),
            member: parts.join("/"),
        }
    }

    /// Where this member lands on restore, under `alt_root` or the original root
    pub fn destination(&self, alt_root: Option<&Path>) -> PathBuf {
        let mut dest = alt_root.map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());
        for part in self.member.split('/').filter(|p| !p.is_empty()) {
            dest.push(part);
        }
        dest
    }
}

/// Map a recorded absolute path to its location under an alternate root
pub fn relocate(path: &Path, alt_root: Option<&Path>) -> PathBuf {
    match alt_root {
        Some(_) => MemberName::from_path(path).destination(alt_root),
        None => path.to_path_buf(),
    }
}

/// Case sensitivity rules for comparing names and paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRules {
    case_insensitive: bool,
}

impl Default for PathRules {
    fn default() -> Self {
        Self::platform()
    }
}

impl PathRules {
    /// Rules of the running platform: case-insensitive on Windows only
    pub fn platform() -> Self {
        Self {
            case_insensitive: cfg!(windows),
        }
    }

    /// Byte-exact comparisons
    pub fn case_sensitive() -> Self {
        Self { case_insensitive: false }
    }

    /// Comparisons that ignore case
    pub fn case_insensitive() -> Self {
        Self { case_insensitive: true }
    }

    /// Whether comparisons ignore case
    pub fn is_case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    fn fold<'a>(&self, s: &'a str) -> Cow<'a, str> {
        if self.case_insensitive {
            Cow::Owned(s.to_lowercase())
        } else {
            Cow::Borrowed(s)
        }
    }

    /// String equality under these rules
    pub fn equals(&self, a: &str, b: &str) -> bool {
        self.fold(a) == self.fold(b)
    }

    /// Whether `haystack` contains `needle`; empty strings never match
    pub fn contains(&self, needle: &str, haystack: &str) -> bool {
        if needle.is_empty() || haystack.is_empty() {
            return false;
        }
        self.fold(haystack).contains(self.fold(needle).as_ref())
    }

    fn component_eq(&self, a: Component<'_>, b: Component<'_>) -> bool {
        self.equals(&a.as_os_str().to_string_lossy(), &b.as_os_str().to_string_lossy())
    }

    /// Component-wise path equality (trailing separators are ignored)
    pub fn paths_equal(&self, a: &Path, b: &Path) -> bool {
        let mut left = a.components();
        let mut right = b.components();
        loop {
            match (left.next(), right.next()) {
                (None, None) => return true,
                (Some(x), Some(y)) if self.component_eq(x, y) => continue,
                _ => return false,
            }
        }
    }

    /// Component-wise prefix test: `/a/b` starts `/a/b/c` but not `/a/bc`
    pub fn path_starts_with(&self, path: &Path, prefix: &Path) -> bool {
        let mut components = path.components();
        for wanted in prefix.components() {
            match components.next() {
                Some(c) if self.component_eq(c, wanted) => {}
                _ => return false,
            }
        }
        true
    }

    /// Whether the trailing components of `path` equal all components of `name`
    ///
    /// A bare `five` matches any path whose file name is `five`; `four/five`
    /// matches `/src/one/four/five`.
    pub fn suffix_matches(&self, path: &Path, name: &Path) -> bool {
        let wanted: Vec<Component<'_>> = name
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect();
        if wanted.is_empty() {
            return false;
        }
        let have: Vec<Component<'_>> = path.components().collect();
        if have.len() < wanted.len() {
            return false;
        }
        have[have.len() - wanted.len()..]
            .iter()
            .zip(&wanted)
            .all(|(a, b)| self.component_eq(*a, *b))
    }
}

/// Whether `name` names a location directly rather than a partial/bare name
pub fn is_full_path(name: &Path) -> bool {
    name.has_root()
}
