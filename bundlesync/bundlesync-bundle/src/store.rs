//! Per-root content-hash bundles.
//!
//! A [`HashBundle`] maps every eligible file of one workspace root to its
//! content hash. [`HashBundleStore::update_bundle`] rehashes either the whole
//! root or a list of changed paths and reports the [`BundleDelta`] against the
//! previous state.

use crate::registry::WorkspaceRegistry;
use crate::scanner::{BundleScanner, hash_file};
use bundlesync_core::error::{Result, SyncError};
use bundlesync_core::path::{is_under, normalize_path};
use bundlesync_core::types::{BundleDelta, FileHashes};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Hashes of every bundled file under one root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashBundle {
    pub root: PathBuf,
    pub files: FileHashes,
    pub updated_at: DateTime<Utc>,
}

impl HashBundle {
    fn new(root: PathBuf, files: FileHashes) -> Self {
        Self {
            root,
            files,
            updated_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Owns the hash bundle of every registered root.
pub struct HashBundleStore {
    registry: Arc<WorkspaceRegistry>,
    scanner: BundleScanner,
    bundles: DashMap<PathBuf, HashBundle>,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl HashBundleStore {
    pub fn new(registry: Arc<WorkspaceRegistry>, scanner: BundleScanner) -> Self {
        Self {
            registry,
            scanner,
            bundles: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    /// Lock serializing bundle updates of one root.
    fn root_lock(&self, root: &Path) -> Arc<Mutex<()>> {
        self.locks.entry(root.to_path_buf()).or_default().clone()
    }

    /// Rehash `root` and return what changed since the last update.
    ///
    /// With `changed = None`, or when the root has no bundle yet, the whole
    /// root is rescanned. Otherwise only the listed paths are rehashed; paths
    /// that no longer exist or no longer qualify count as removed. A directory
    /// path drops every file under it and is walked again if it still exists.
    ///
    /// Updates of the same root run one at a time.
    ///
    /// # Errors
    ///
    /// `StaleRootOperation` when the root is not (or no longer) registered.
    pub async fn update_bundle(
        &self,
        root: &Path,
        changed: Option<Vec<PathBuf>>,
    ) -> Result<BundleDelta> {
        let root = normalize_path(root);
        if !self.registry.contains(&root) {
            return Err(SyncError::stale_root(&root));
        }

        let lock = self.root_lock(&root);
        let _guard = lock.lock().await;

        let previous = self.bundles.get(&root).map(|b| b.files.clone());

        let next = match (changed, previous.as_ref()) {
            (Some(paths), Some(previous)) => {
                match self.rehash_paths(&root, previous.clone(), paths).await {
                    Ok(files) => files,
                    Err(e @ SyncError::BundleCorruption { .. }) => {
                        warn!("{}; rescanning {}", e, root.display());
                        self.rescan(&root).await?
                    }
                    Err(e) => return Err(e),
                }
            }
            _ => self.rescan(&root).await?,
        };

        // The root may have been removed while hashing
        if !self.registry.contains(&root) {
            debug!("Dropping hash update for removed root {}", root.display());
            return Err(SyncError::stale_root(&root));
        }

        let previous = previous.unwrap_or_default();
        let delta = BundleDelta::between(&previous, &next);
        debug!(
            "Bundle {} updated: +{} ~{} -{}",
            root.display(),
            delta.added.len(),
            delta.changed.len(),
            delta.removed.len()
        );

        self.bundles
            .insert(root.clone(), HashBundle::new(root, next));
        Ok(delta)
    }

    async fn rescan(&self, root: &Path) -> Result<FileHashes> {
        let scanner = self.scanner.clone();
        let target = root.to_path_buf();
        let files = tokio::task::spawn_blocking(move || scanner.scan(&target))
            .await
            .map_err(|e| SyncError::internal(format!("Scan task failed: {}", e)))??;

        info!("Scanned {}: {} files", root.display(), files.len());
        Ok(files)
    }

    async fn rehash_paths(
        &self,
        root: &Path,
        mut files: FileHashes,
        paths: Vec<PathBuf>,
    ) -> Result<FileHashes> {
        let scanner = self.scanner.clone();
        let root = root.to_path_buf();

        tokio::task::spawn_blocking(move || {
            for path in paths {
                let path = normalize_path(&path);
                if !is_under(&path, &root) {
                    warn!(
                        "Ignoring {} outside workspace {}",
                        path.display(),
                        root.display()
                    );
                    continue;
                }

                // Covers directories that were renamed or deleted
                files.retain(|key, _| key == &path || !key.starts_with(&path));

                if path.is_dir() {
                    files.remove(&path);
                    files.extend(scanner.scan_subtree(&root, &path));
                    continue;
                }

                if !scanner.accepts(&root, &path) {
                    files.remove(&path);
                    continue;
                }

                match hash_file(&path) {
                    Ok(Some(hash)) => {
                        files.insert(path, hash);
                    }
                    Ok(None) => {
                        files.remove(&path);
                    }
                    Err(e) => {
                        return Err(SyncError::bundle_corruption(
                            &root,
                            format!("failed to hash {}: {}", path.display(), e),
                        ));
                    }
                }
            }

            if let Some(stray) = files.keys().find(|p| !is_under(p, &root)) {
                return Err(SyncError::bundle_corruption(
                    &root,
                    format!("{} lies outside the root", stray.display()),
                ));
            }

            Ok(files)
        })
        .await
        .map_err(|e| SyncError::internal(format!("Hash task failed: {}", e)))?
    }

    /// Drop the bundle of a removed root.
    pub fn remove_bundle(&self, root: &Path) -> bool {
        let root = normalize_path(root);
        let removed = self.bundles.remove(&root).is_some();
        self.locks.remove(&root);
        if removed {
            info!("Hash bundle dropped: {}", root.display());
        }
        removed
    }

    /// True when the root has no bundle or its bundle holds no files.
    pub fn is_empty(&self, root: &Path) -> bool {
        self.bundles
            .get(&normalize_path(root))
            .is_none_or(|bundle| bundle.is_empty())
    }

    /// True when no root has a bundle.
    pub fn all_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    pub fn bundle(&self, root: &Path) -> Option<HashBundle> {
        self.bundles.get(&normalize_path(root)).map(|b| b.clone())
    }

    /// Current file hashes of `root`.
    pub fn snapshot(&self, root: &Path) -> Option<FileHashes> {
        self.bundles
            .get(&normalize_path(root))
            .map(|b| b.files.clone())
    }

    pub fn roots(&self) -> Vec<PathBuf> {
        self.bundles.iter().map(|entry| entry.key().clone()).collect()
    }
}
