//! Workspace scanning and content hashing.

use bundlesync_core::config::BundleConfig;
use bundlesync_core::error::{Result, SyncError};
use bundlesync_core::types::{ContentHash, FileHashes};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::WalkBuilder;
use rayon::prelude::*;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Walks workspace roots and hashes the files that belong in a bundle.
#[derive(Debug, Clone)]
pub struct BundleScanner {
    config: BundleConfig,
}

impl BundleScanner {
    pub fn new(config: BundleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BundleConfig {
        &self.config
    }

    /// Hash every eligible file under `root`.
    ///
    /// Files that vanish or cannot be read during the walk are left out.
    pub fn scan(&self, root: &Path) -> Result<FileHashes> {
        if !root.is_dir() {
            return Err(SyncError::not_found(
                "workspace directory",
                root.display().to_string(),
            ));
        }

        let candidates = self.candidates(root);
        debug!("Hashing {} files under {}", candidates.len(), root.display());

        let files = candidates
            .par_iter()
            .filter_map(|path| match hash_file(path) {
                Ok(Some(hash)) => Some((path.clone(), hash)),
                Ok(None) => None,
                Err(e) => {
                    warn!("Skipping unreadable file {}: {}", path.display(), e);
                    None
                }
            })
            .collect();

        Ok(files)
    }

    /// Hash every eligible file under `dir`, a directory inside `root`.
    ///
    /// Ignore files between `root` and `dir` still apply.
    pub fn scan_subtree(&self, root: &Path, dir: &Path) -> Vec<(PathBuf, ContentHash)> {
        if !dir.starts_with(root)
            || !self.passes_filters(root, dir)
            || self.is_gitignored(root, dir, true)
        {
            return Vec::new();
        }

        let candidates: Vec<PathBuf> = self
            .walk(root, dir)
            .into_iter()
            .filter(|path| !self.is_gitignored(root, path, false))
            .collect();

        candidates
            .par_iter()
            .filter_map(|path| match hash_file(path) {
                Ok(Some(hash)) => Some((path.clone(), hash)),
                Ok(None) => None,
                Err(e) => {
                    warn!("Skipping unreadable file {}: {}", path.display(), e);
                    None
                }
            })
            .collect()
    }

    fn candidates(&self, root: &Path) -> Vec<PathBuf> {
        self.walk(root, root)
    }

    fn walk(&self, root: &Path, start: &Path) -> Vec<PathBuf> {
        let walker = WalkBuilder::new(start)
            .hidden(!self.config.include_hidden)
            .git_ignore(self.config.respect_gitignore)
            .git_exclude(self.config.respect_gitignore)
            .git_global(false)
            .require_git(false)
            .build();

        walker
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Walk error under {}: {}", start.display(), e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
            .map(|entry| entry.into_path())
            .filter(|path| self.passes_filters(root, path) && self.within_limits(path))
            .collect()
    }

    /// Whether `path` (under `root`) belongs in the bundle.
    ///
    /// Checks names, gitignore rules and size. Missing files are not accepted.
    pub fn accepts(&self, root: &Path, path: &Path) -> bool {
        self.passes_filters(root, path)
            && self.within_limits(path)
            && !self.is_gitignored(root, path, false)
    }

    fn passes_filters(&self, root: &Path, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(root) else {
            return false;
        };

        let ignored = relative.components().any(|component| {
            let name = component.as_os_str();
            let hidden = !self.config.include_hidden
                && name.to_str().is_some_and(|n| n.starts_with('.'));
            hidden
                || self
                    .config
                    .ignore_patterns
                    .iter()
                    .any(|pattern| name == pattern.as_str())
        });
        !ignored
    }

    fn within_limits(&self, path: &Path) -> bool {
        if !self.config.extensions.is_empty() {
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
            if !self.config.extensions.iter().any(|allowed| allowed == ext) {
                return false;
            }
        }

        match std::fs::metadata(path) {
            Ok(meta) => meta.is_file() && meta.len() <= self.config.max_file_size_bytes(),
            Err(_) => false,
        }
    }

    /// Apply the `.gitignore` files from `root` down to the parent of `path`.
    ///
    /// Deeper files override shallower ones, whitelist rules included.
    fn is_gitignored(&self, root: &Path, path: &Path, is_dir: bool) -> bool {
        if !self.config.respect_gitignore || path == root {
            return false;
        }
        let Some(parent) = path.parent() else {
            return false;
        };

        let dirs: Vec<&Path> = parent
            .ancestors()
            .take_while(|dir| dir.starts_with(root))
            .collect();

        let mut ignored = false;
        for dir in dirs.into_iter().rev() {
            let Some(matcher) = gitignore_in(dir) else {
                continue;
            };
            let matched = matcher.matched_path_or_any_parents(path, is_dir);
            if matched.is_ignore() {
                ignored = true;
            } else if matched.is_whitelist() {
                ignored = false;
            }
        }
        ignored
    }
}

fn gitignore_in(dir: &Path) -> Option<Gitignore> {
    let file = dir.join(".gitignore");
    if !file.is_file() {
        return None;
    }

    let mut builder = GitignoreBuilder::new(dir);
    if let Some(e) = builder.add(&file) {
        warn!("Partially invalid {}: {}", file.display(), e);
    }
    match builder.build() {
        Ok(matcher) => Some(matcher),
        Err(e) => {
            warn!("Ignoring unreadable {}: {}", file.display(), e);
            None
        }
    }
}

/// Hash one file. `Ok(None)` when the path does not exist or is not a file.
pub fn hash_file(path: &Path) -> io::Result<Option<ContentHash>> {
    match std::fs::read(path) {
        Ok(content) => Ok(Some(ContentHash::of(&content))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) if path.is_dir() => {
            debug!("Not a file: {} ({})", path.display(), e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scanner() -> BundleScanner {
        BundleScanner::new(BundleConfig::default())
    }

    #[test]
    fn test_scan_hashes_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/a.rs"), "fn a() {}").unwrap();
        fs::write(dir.path().join("b.ts"), "export {}").unwrap();

        let files = scanner().scan(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(
            files.get(&dir.path().join("src/a.rs")),
            Some(&ContentHash::of(b"fn a() {}"))
        );
    }

    #[test]
    fn test_scan_respects_ignore_patterns_and_size() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        fs::write(dir.path().join("node_modules/pkg/index.js"), "x").unwrap();
        fs::write(dir.path().join("big.js"), vec![b'x'; 2048]).unwrap();
        fs::write(dir.path().join("small.js"), "y").unwrap();

        let mut config = BundleConfig::default();
        config.max_file_size_kb = 1;
        let files = BundleScanner::new(config).scan(dir.path()).unwrap();

        let names: Vec<_> = files.keys().map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf()).collect();
        assert_eq!(names, vec![PathBuf::from("small.js")]);
    }

    #[test]
    fn test_scan_respects_gitignore_without_repo() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".gitignore"), "dist/\n").unwrap();
        fs::create_dir_all(dir.path().join("dist")).unwrap();
        fs::write(dir.path().join("dist/out.js"), "built").unwrap();
        fs::write(dir.path().join("main.js"), "src").unwrap();

        let files = scanner().scan(dir.path()).unwrap();
        assert!(files.contains_key(&dir.path().join("main.js")));
        assert!(!files.contains_key(&dir.path().join("dist/out.js")));
    }

    #[test]
    fn test_extension_filter() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), "a").unwrap();
        fs::write(dir.path().join("notes.md"), "b").unwrap();

        let mut config = BundleConfig::default();
        config.extensions = vec!["rs".to_string()];
        let files = BundleScanner::new(config).scan(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files.contains_key(&dir.path().join("a.rs")));
    }

    #[test]
    fn test_accepts_applies_gitignore() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".gitignore"), "dist/\n*.log\n").unwrap();
        fs::create_dir_all(dir.path().join("dist")).unwrap();
        fs::create_dir_all(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("pkg/.gitignore"), "!keep.log\n").unwrap();
        fs::write(dir.path().join("dist/out.js"), "built").unwrap();
        fs::write(dir.path().join("debug.log"), "log").unwrap();
        fs::write(dir.path().join("pkg/keep.log"), "log").unwrap();
        fs::write(dir.path().join("main.js"), "src").unwrap();

        let scanner = scanner();
        assert!(!scanner.accepts(dir.path(), &dir.path().join("dist/out.js")));
        assert!(!scanner.accepts(dir.path(), &dir.path().join("debug.log")));
        assert!(scanner.accepts(dir.path(), &dir.path().join("pkg/keep.log")));
        assert!(scanner.accepts(dir.path(), &dir.path().join("main.js")));

        let mut config = BundleConfig::default();
        config.respect_gitignore = false;
        assert!(BundleScanner::new(config).accepts(dir.path(), &dir.path().join("dist/out.js")));
    }

    #[test]
    fn test_scan_subtree() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".gitignore"), "gen/\n").unwrap();
        fs::create_dir_all(dir.path().join("lib/gen")).unwrap();
        fs::write(dir.path().join("lib/a.rs"), "a").unwrap();
        fs::write(dir.path().join("lib/gen/b.rs"), "b").unwrap();
        fs::write(dir.path().join("top.rs"), "t").unwrap();

        let files = scanner().scan_subtree(dir.path(), &dir.path().join("lib"));
        assert_eq!(files, vec![(dir.path().join("lib/a.rs"), ContentHash::of(b"a"))]);

        fs::create_dir_all(dir.path().join("gen")).unwrap();
        fs::write(dir.path().join("gen/c.rs"), "c").unwrap();
        assert!(scanner().scan_subtree(dir.path(), &dir.path().join("gen")).is_empty());
    }

    #[test]
    fn test_scan_missing_root() {
        let err = scanner().scan(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
    }

    #[test]
    fn test_hash_missing_file() {
        assert_eq!(hash_file(Path::new("/definitely/not/here.rs")).unwrap(), None);
    }
}
