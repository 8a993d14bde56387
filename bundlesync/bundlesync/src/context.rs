//! Explicit runtime context for bundle synchronization.
//!
//! [`SyncContext::activate`] builds every component around one transport and
//! starts the event queue; [`SyncContext::deactivate`] tears every root down
//! and stops the queue. The methods in between are the capability surface
//! offered to an editor integration.
//!
//! # Example
//!
//! ```no_run
//! use bundlesync::{SyncContext, WorkspaceEvent, FolderChange};
//! use bundlesync_core::{RemoteTransport, SyncConfig};
//! use std::sync::Arc;
//!
//! # async fn example(transport: Arc<dyn RemoteTransport>) -> bundlesync_core::Result<()> {
//! let config = SyncConfig::load_or_default().await?;
//! let context = SyncContext::activate(config, transport).await?;
//!
//! context.submit(WorkspaceEvent::Folders(vec![FolderChange::Added("/home/me/project".into())]))?;
//! context.flush().await?;
//!
//! context.deactivate().await?;
//! # Ok(())
//! # }
//! ```

use crate::coordinator::{ChangeCoordinator, ErrorSink, EventQueue, EventSender, WorkspaceEvent};
use crate::watcher::FolderWatcher;
use bundlesync_analysis::{AnalysisResultStore, RemapStats};
use bundlesync_bundle::{
    BundleScanner, HashBundleStore, RemoteBundleSynchronizer, WorkspaceRegistry, WorkspaceRoot,
};
use bundlesync_core::analysis::{AnalysisResultSet, EditDelta, Severity, VisibleIssue};
use bundlesync_core::config::SyncConfig;
use bundlesync_core::error::{Result, SyncError};
use bundlesync_core::path::normalize_path;
use bundlesync_core::traits::RemoteTransport;
use bundlesync_core::types::{RemoteBundle, SyncOutcome};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Every component of one activation, plus its event queue.
pub struct SyncContext {
    config: SyncConfig,
    coordinator: Arc<ChangeCoordinator>,
    queue: EventQueue,
}

impl SyncContext {
    /// Build the components and start the event queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the folder watcher
    /// cannot be started.
    pub async fn activate(config: SyncConfig, transport: Arc<dyn RemoteTransport>) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(WorkspaceRegistry::new());
        let hashes = Arc::new(HashBundleStore::new(
            Arc::clone(&registry),
            BundleScanner::new(config.bundle.clone()),
        ));
        let synchronizer = Arc::new(RemoteBundleSynchronizer::new(
            transport,
            config.remote.clone(),
        ));
        let results = Arc::new(AnalysisResultStore::new(
            config.analysis.hidden_severities.iter().copied(),
        ));

        let coordinator = Arc::new(ChangeCoordinator::new(
            registry,
            hashes,
            synchronizer,
            results,
        ));
        let queue = coordinator.spawn_queue();

        if config.watcher.enabled {
            let watcher = FolderWatcher::start(&config.watcher, queue.sender())?;
            coordinator.set_watcher(Arc::new(watcher));
        }

        info!("Sync context activated");
        Ok(Self {
            config,
            coordinator,
            queue,
        })
    }

    /// Stop the queue and tear down every registered root.
    ///
    /// # Errors
    ///
    /// Returns the first teardown failure; every root is cleared regardless.
    pub async fn deactivate(self) -> Result<()> {
        self.coordinator.take_watcher();
        self.queue.shutdown().await;

        let mut first_error = None;
        for root in self.coordinator.registry().roots() {
            if let Err(e) = self.coordinator.remove_root(&root).await {
                first_error.get_or_insert(e);
            }
        }
        self.coordinator.settle().await;

        info!("Sync context deactivated");
        first_error.map_or(Ok(()), Err)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<ChangeCoordinator> {
        &self.coordinator
    }

    pub fn set_error_sink(&self, sink: ErrorSink) {
        self.coordinator.set_error_sink(sink);
    }

    /// Queue an editor or watcher notification.
    pub fn submit(&self, event: WorkspaceEvent) -> Result<()> {
        self.queue.submit(event)
    }

    pub fn events(&self) -> EventSender {
        self.queue.sender()
    }

    /// Wait until every queued event was handled.
    pub async fn flush(&self) -> Result<()> {
        self.queue.flush().await
    }

    /// Wait until every queued event was handled and every analysis it
    /// started has finished.
    pub async fn settle(&self) -> Result<()> {
        self.queue.flush().await?;
        self.coordinator.settle().await;
        Ok(())
    }

    // Workspace and bundle control

    /// Re-run analysis for every root with a remote bundle.
    pub fn start_analysis(&self) -> usize {
        self.coordinator.start_analysis()
    }

    /// Replace the root list. Removed roots are cleared completely; new roots
    /// are only registered and get bundled by
    /// [`update_hashes_bundles`](Self::update_hashes_bundles).
    pub async fn create_workspaces_list(&self, roots: &[PathBuf]) {
        let registry = self.coordinator.registry();
        let wanted: Vec<PathBuf> = roots.iter().map(|r| normalize_path(r)).collect();

        let removed: Vec<PathBuf> = registry
            .roots()
            .into_iter()
            .filter(|root| !wanted.contains(root))
            .collect();
        for root in &removed {
            if let Err(e) = self.coordinator.remove_root(root).await {
                self.report(&e);
            }
        }

        for root in &wanted {
            self.change_workspace_list(root, false);
        }
    }

    /// Add `path` to the root list, or remove it when `removing`.
    ///
    /// Only the registry changes; hashes, remote bundle and results follow
    /// through the dedicated methods.
    pub fn change_workspace_list(&self, path: &Path, removing: bool) {
        if removing {
            self.coordinator.registry().remove_root(path);
        } else {
            self.coordinator.registry().add_root(path);
            self.coordinator.synchronizer().register(path);
        }
    }

    /// Make the registered root `path` the active one.
    pub fn update_current_workspace_path(&self, path: &Path) -> Result<Option<PathBuf>> {
        self.coordinator.registry().set_active(path)
    }

    /// Rescan `path` (every registered root when `None`) and sync the result,
    /// or drop the hash bundles when `removing`.
    ///
    /// Per-root failures go to the error sink; the outcomes of the roots that
    /// succeeded are returned.
    pub async fn update_hashes_bundles(
        &self,
        path: Option<&Path>,
        removing: bool,
    ) -> Vec<(PathBuf, SyncOutcome)> {
        let hashes = self.coordinator.hashes();
        if removing {
            match path {
                Some(root) => {
                    hashes.remove_bundle(root);
                }
                None => {
                    for root in hashes.roots() {
                        hashes.remove_bundle(&root);
                    }
                }
            }
            return Vec::new();
        }

        let roots = match path {
            Some(root) => vec![normalize_path(root)],
            None => self.coordinator.registry().roots(),
        };

        let mut outcomes = Vec::with_capacity(roots.len());
        for root in roots {
            match self.coordinator.refresh_root(&root, None).await {
                Ok(outcome) => outcomes.push((root, outcome)),
                Err(e) => self.report(&e),
            }
        }
        outcomes
    }

    /// Adopt an externally created remote bundle for `path`, or delete the
    /// remote bundle of `path` when `bundle` is `None`.
    pub async fn update_extension_remote_bundles(
        &self,
        path: &Path,
        bundle: Option<RemoteBundle>,
    ) -> Result<()> {
        match bundle {
            Some(bundle) => self.coordinator.adopt_remote_bundle(path, bundle).await,
            None => self.coordinator.synchronizer().teardown(path).await,
        }
    }

    /// Whether `path` (every root when `None`) has no hashed files.
    pub fn check_if_hashes_bundles_is_empty(&self, path: Option<&Path>) -> bool {
        let hashes = self.coordinator.hashes();
        match path {
            Some(root) => hashes.is_empty(root),
            None => hashes.all_empty(),
        }
    }

    /// Whether `path` (every root when `None`) has no remote bundle.
    pub fn check_if_remote_bundles_is_empty(&self, path: Option<&Path>) -> bool {
        let synchronizer = self.coordinator.synchronizer();
        match path {
            Some(root) => synchronizer.is_empty(root),
            None => synchronizer.all_empty(),
        }
    }

    pub fn workspace_roots(&self) -> Vec<WorkspaceRoot> {
        self.coordinator.registry().workspace_roots()
    }

    // Result control

    pub fn find_suggestion_id(&self, name: &str, file: &Path) -> Option<String> {
        self.coordinator.results().find_suggestion_id(name, file)
    }

    pub fn remove_review_results(&self, path: &Path) -> bool {
        self.coordinator.results().remove_review_results(path)
    }

    /// Displayable issues of every file, for rendering.
    pub fn create_review_results(&self) -> BTreeMap<PathBuf, Vec<VisibleIssue>> {
        self.coordinator.results().create_review_results()
    }

    /// Shift issue rows after an edit. `None` when the file has no results.
    pub fn update_review_results_positions(&self, delta: &EditDelta) -> Option<RemapStats> {
        self.coordinator.document_edited(delta)
    }

    pub fn configure_issues_display_by_severity(&self, severity: Severity, hide: bool) {
        self.coordinator.results().filter_by_severity(severity, hide);
    }

    /// Ingest a result set obtained outside the context.
    pub fn update_analysis_results_collection(&self, set: AnalysisResultSet, root: &Path) {
        self.coordinator.results().ingest(root, set);
    }

    fn report(&self, err: &SyncError) {
        self.coordinator.report(err);
    }
}
