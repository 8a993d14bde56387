//! Root-relative bundle paths and workspace root helpers.
//!
//! The remote side addresses files by their path inside a bundle, always
//! relative to the workspace root and rendered with a leading slash
//! (`/src/main.rs`). Locally, bundles are keyed by absolute paths; the helpers
//! here convert between the two and resolve which root owns a path.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// A file path inside a bundle, independent of where the root lives on disk.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BundlePath {
    segments: Vec<String>,
}

impl BundlePath {
    /// Parse a bundle path. Leading slashes, empty and `.` segments are dropped.
    pub fn new(path: &str) -> Result<Self, BundlePathError> {
        let mut segments: Vec<String> = Vec::new();

        for segment in path.trim().split(['/', '\\']) {
            match segment {
                "" | "." => continue,
                ".." => {
                    if segments.pop().is_none() {
                        return Err(BundlePathError::EscapesRoot);
                    }
                }
                s if s.contains('\0') => return Err(BundlePathError::InvalidCharacter('\0')),
                s => segments.push(s.to_string()),
            }
        }

        Ok(Self { segments })
    }

    /// Build a bundle path from a physical path under `root`.
    pub fn from_physical(physical: &Path, root: &Path) -> Result<Self, BundlePathError> {
        let relative = physical
            .strip_prefix(root)
            .map_err(|_| BundlePathError::NotRelativeTo(root.to_path_buf()))?;

        let relative = relative.to_str().ok_or(BundlePathError::InvalidUtf8)?;

        Self::new(relative)
    }

    /// Resolve this bundle path against a physical root.
    pub fn to_physical(&self, root: &Path) -> PathBuf {
        let mut physical = root.to_path_buf();
        for segment in &self.segments {
            physical.push(segment);
        }
        physical
    }

    /// Get the file name (last segment), if any.
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(|s| s.as_str())
    }

    /// Get the extension of the file, if any.
    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name()?;
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => Some(ext),
            _ => None,
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for BundlePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

impl TryFrom<String> for BundlePath {
    type Error = BundlePathError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(&s)
    }
}

impl From<BundlePath> for String {
    fn from(path: BundlePath) -> Self {
        path.to_string()
    }
}

/// Errors that can occur when working with bundle paths.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BundlePathError {
    #[error("Invalid character in path: {0:?}")]
    InvalidCharacter(char),

    #[error("Path is not relative to root: {0}")]
    NotRelativeTo(PathBuf),

    #[error("Path contains invalid UTF-8")]
    InvalidUtf8,

    #[error("Path escapes the workspace root")]
    EscapesRoot,
}

/// Lexically normalize a path: drop `.` components and resolve `..`.
///
/// No filesystem access; symlinks are not followed.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Whether `path` is `root` itself or lies below it (component-wise).
pub fn is_under(path: &Path, root: &Path) -> bool {
    path.starts_with(root)
}

/// Longest-prefix match of `path` over `roots`.
pub fn owning_root<'a, I>(path: &Path, roots: I) -> Option<&'a Path>
where
    I: IntoIterator<Item = &'a Path>,
{
    roots
        .into_iter()
        .filter(|root| is_under(path, root))
        .max_by_key(|root| root.components().count())
}
