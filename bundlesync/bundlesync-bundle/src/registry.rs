//! Registry of open workspace roots and the current one.

use bundlesync_core::error::{Result, SyncError};
use bundlesync_core::path::{normalize_path, owning_root};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{debug, info};

/// Snapshot of one registered root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceRoot {
    pub path: PathBuf,
    pub active: bool,
}

#[derive(Debug, Default)]
struct RegistryState {
    roots: BTreeSet<PathBuf>,
    active: Option<PathBuf>,
}

/// Tracks registered workspace roots and which one is active.
///
/// Subscribers of [`WorkspaceRegistry::subscribe`] are notified only when
/// the active root actually changes.
pub struct WorkspaceRegistry {
    state: RwLock<RegistryState>,
    active_tx: watch::Sender<Option<PathBuf>>,
}

impl WorkspaceRegistry {
    pub fn new() -> Self {
        let (active_tx, _) = watch::channel(None);
        Self {
            state: RwLock::new(RegistryState::default()),
            active_tx,
        }
    }

    /// Register a root. Returns `false` if it was already registered.
    pub fn add_root(&self, path: &Path) -> bool {
        let path = normalize_path(path);
        let inserted = self.state.write().roots.insert(path.clone());
        if inserted {
            info!("Workspace root added: {}", path.display());
        } else {
            debug!("Workspace root already registered: {}", path.display());
        }
        inserted
    }

    /// Unregister a root. Unknown paths are ignored.
    pub fn remove_root(&self, path: &Path) -> bool {
        let path = normalize_path(path);
        let (removed, cleared_active) = {
            let mut state = self.state.write();
            let removed = state.roots.remove(&path);
            let cleared = removed && state.active.as_deref() == Some(path.as_path());
            if cleared {
                state.active = None;
            }
            (removed, cleared)
        };

        if removed {
            info!("Workspace root removed: {}", path.display());
        }
        if cleared_active {
            self.active_tx.send_replace(None);
        }
        removed
    }

    /// Move the active flag to the root containing `document`.
    ///
    /// Returns the new active root when it changed. A document outside every
    /// root leaves the active root untouched.
    pub fn set_active_from_document(&self, document: &Path) -> Option<PathBuf> {
        let document = normalize_path(document);
        let resolved = {
            let state = self.state.read();
            owning_root(&document, state.roots.iter().map(PathBuf::as_path))
                .map(Path::to_path_buf)
        };

        match resolved {
            Some(root) => self.activate(root),
            None => {
                debug!("No workspace root contains {}", document.display());
                None
            }
        }
    }

    /// Make a registered root the active one.
    pub fn set_active(&self, root: &Path) -> Result<Option<PathBuf>> {
        let root = normalize_path(root);
        if !self.contains(&root) {
            return Err(SyncError::not_found("workspace root", root.display().to_string()));
        }
        Ok(self.activate(root))
    }

    fn activate(&self, root: PathBuf) -> Option<PathBuf> {
        {
            let mut state = self.state.write();
            if state.active.as_ref() == Some(&root) {
                return None;
            }
            state.active = Some(root.clone());
        }

        info!("Active workspace root changed: {}", root.display());
        self.active_tx.send_replace(Some(root.clone()));
        Some(root)
    }

    pub fn active_root(&self) -> Option<PathBuf> {
        self.state.read().active.clone()
    }

    pub fn contains(&self, root: &Path) -> bool {
        self.state.read().roots.contains(&normalize_path(root))
    }

    /// Root that owns `path` (longest prefix).
    pub fn root_for(&self, path: &Path) -> Option<PathBuf> {
        let path = normalize_path(path);
        let state = self.state.read();
        owning_root(&path, state.roots.iter().map(PathBuf::as_path)).map(Path::to_path_buf)
    }

    pub fn roots(&self) -> Vec<PathBuf> {
        self.state.read().roots.iter().cloned().collect()
    }

    pub fn workspace_roots(&self) -> Vec<WorkspaceRoot> {
        let state = self.state.read();
        state
            .roots
            .iter()
            .map(|path| WorkspaceRoot {
                path: path.clone(),
                active: state.active.as_ref() == Some(path),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().roots.is_empty()
    }

    /// Receive active-root changes.
    pub fn subscribe(&self) -> watch::Receiver<Option<PathBuf>> {
        self.active_tx.subscribe()
    }
}

impl Default for WorkspaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
