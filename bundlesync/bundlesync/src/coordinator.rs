//! Single ingress for workspace events.
//!
//! The coordinator sequences registry, hash store, synchronizer and result
//! store for every folder, file and document notification. Events submitted
//! through an [`EventQueue`] are handled one at a time in arrival order; the
//! whole add or remove chain of one folder finishes before the next folder
//! starts.

use crate::watcher::FolderWatcher;
use bundlesync_analysis::{AnalysisResultStore, RemapStats};
use bundlesync_bundle::{HashBundleStore, RemoteBundleSynchronizer, WorkspaceRegistry};
use bundlesync_core::analysis::EditDelta;
use bundlesync_core::error::{Result, SyncError};
use bundlesync_core::path::normalize_path;
use bundlesync_core::types::{BundleId, RemoteBundle, SyncOutcome};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Receives every error that should reach the user.
pub type ErrorSink = Arc<dyn Fn(&SyncError) + Send + Sync>;

/// One folder added to or removed from the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderChange {
    Added(PathBuf),
    Removed(PathBuf),
}

/// Notification from the editor or the folder watcher.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkspaceEvent {
    /// Folder changes, applied in order
    Folders(Vec<FolderChange>),
    ActiveDocumentChanged(PathBuf),
    DocumentEdited(EditDelta),
    /// Saved, created or deleted files, possibly across several roots
    FilesChanged(Vec<PathBuf>),
}

#[derive(Clone, Default)]
struct Reporter {
    sink: Arc<RwLock<Option<ErrorSink>>>,
}

impl Reporter {
    fn report(&self, err: &SyncError) {
        if !err.is_reportable() {
            debug!("Discarded: {}", err);
            return;
        }
        warn!("{}", err);
        let sink = self.sink.read().clone();
        if let Some(sink) = sink {
            sink(err);
        }
    }
}

/// Sequences the bundle lifecycle of every workspace root.
pub struct ChangeCoordinator {
    registry: Arc<WorkspaceRegistry>,
    hashes: Arc<HashBundleStore>,
    synchronizer: Arc<RemoteBundleSynchronizer>,
    results: Arc<AnalysisResultStore>,
    analyses: DashMap<PathBuf, JoinHandle<()>>,
    /// Generation of the newest analysis started per root
    generations: Arc<DashMap<PathBuf, u64>>,
    next_generation: AtomicU64,
    refresh_locks: DashMap<PathBuf, Arc<Mutex<()>>>,
    reporter: Reporter,
    watcher: RwLock<Option<Arc<FolderWatcher>>>,
}

impl ChangeCoordinator {
    pub fn new(
        registry: Arc<WorkspaceRegistry>,
        hashes: Arc<HashBundleStore>,
        synchronizer: Arc<RemoteBundleSynchronizer>,
        results: Arc<AnalysisResultStore>,
    ) -> Self {
        Self {
            registry,
            hashes,
            synchronizer,
            results,
            analyses: DashMap::new(),
            generations: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(0),
            refresh_locks: DashMap::new(),
            reporter: Reporter::default(),
            watcher: RwLock::new(None),
        }
    }

    pub fn set_error_sink(&self, sink: ErrorSink) {
        *self.reporter.sink.write() = Some(sink);
    }

    /// Watch roots as they are added; already registered roots are watched now.
    pub fn set_watcher(&self, watcher: Arc<FolderWatcher>) {
        for root in self.registry.roots() {
            if let Err(e) = watcher.watch(&root) {
                warn!("Cannot watch {}: {}", root.display(), e);
            }
        }
        *self.watcher.write() = Some(watcher);
    }

    pub fn take_watcher(&self) -> Option<Arc<FolderWatcher>> {
        self.watcher.write().take()
    }

    pub fn registry(&self) -> &Arc<WorkspaceRegistry> {
        &self.registry
    }

    pub fn hashes(&self) -> &Arc<HashBundleStore> {
        &self.hashes
    }

    pub fn synchronizer(&self) -> &Arc<RemoteBundleSynchronizer> {
        &self.synchronizer
    }

    pub fn results(&self) -> &Arc<AnalysisResultStore> {
        &self.results
    }

    /// Pass `err` to the error sink unless it is an expected outcome.
    pub fn report(&self, err: &SyncError) {
        self.reporter.report(err);
    }

    /// Handle one event to completion. Failures go to the error sink.
    pub async fn handle_event(&self, event: WorkspaceEvent) {
        match event {
            WorkspaceEvent::Folders(changes) => {
                for change in changes {
                    let result = match &change {
                        FolderChange::Added(root) => self.add_root(root).await,
                        FolderChange::Removed(root) => self.remove_root(root).await,
                    };
                    if let Err(e) = result {
                        self.reporter.report(&e);
                    }
                }
            }
            WorkspaceEvent::ActiveDocumentChanged(document) => {
                self.registry.set_active_from_document(&document);
            }
            WorkspaceEvent::DocumentEdited(delta) => {
                self.document_edited(&delta);
            }
            WorkspaceEvent::FilesChanged(paths) => {
                self.files_changed(paths).await;
            }
        }
    }

    /// Register `root`, bundle it and push it to the remote side.
    ///
    /// Adding a registered root again does nothing.
    pub async fn add_root(&self, root: &Path) -> Result<()> {
        let root = normalize_path(root);
        if !self.registry.add_root(&root) {
            return Ok(());
        }

        self.synchronizer.register(&root);
        self.watch(&root);
        self.refresh_root(&root, None).await.map(|_| ())
    }

    /// Remove `root` and everything held for it.
    ///
    /// The remote bundle is deleted before local state goes; local state goes
    /// even when the deletion fails.
    pub async fn remove_root(&self, root: &Path) -> Result<()> {
        let root = normalize_path(root);
        self.registry.remove_root(&root);
        self.unwatch(&root);

        if let Some((_, task)) = self.analyses.remove(&root) {
            task.abort();
        }
        self.generations.remove(&root);
        self.refresh_locks.remove(&root);

        let teardown = self.synchronizer.teardown(&root).await;
        self.hashes.remove_bundle(&root);
        self.results.remove_review_results(&root);

        info!("Workspace root cleared: {}", root.display());
        teardown
    }

    /// Rehash `root` (only `changed` when given), sync the delta and start an
    /// analysis when the remote bundle changed.
    ///
    /// Refreshes of the same root run one at a time, so deltas reach the
    /// synchronizer in the order they were computed.
    pub async fn refresh_root(
        &self,
        root: &Path,
        changed: Option<Vec<PathBuf>>,
    ) -> Result<SyncOutcome> {
        let root = normalize_path(root);
        let lock = self
            .refresh_locks
            .entry(root.clone())
            .or_default()
            .clone();
        let _guard = lock.lock().await;

        let delta = self.hashes.update_bundle(&root, changed).await?;
        let outcome = self.synchronizer.sync(&root, &delta).await?;

        if let Some(bundle_id) = outcome.changed_bundle() {
            self.trigger_analysis(&root, bundle_id.clone());
        }
        Ok(outcome)
    }

    /// Take over a remote bundle created elsewhere and analyse it.
    pub async fn adopt_remote_bundle(&self, root: &Path, remote: RemoteBundle) -> Result<()> {
        let root = normalize_path(root);
        let bundle_id = remote.bundle_id.clone();
        self.synchronizer.set_handle(&root, remote).await?;
        self.trigger_analysis(&root, bundle_id);
        Ok(())
    }

    /// Group `paths` by owning root and refresh each root.
    pub async fn files_changed(&self, paths: Vec<PathBuf>) {
        let mut by_root: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
        for path in paths {
            match self.registry.root_for(&path) {
                Some(root) => by_root.entry(root).or_default().push(path),
                None => debug!("Change outside every root: {}", path.display()),
            }
        }

        for (root, changed) in by_root {
            if let Err(e) = self.refresh_root(&root, Some(changed)).await {
                self.reporter.report(&e);
            }
        }
    }

    /// Keep issue rows of the edited file in step with the edit.
    pub fn document_edited(&self, delta: &EditDelta) -> Option<RemapStats> {
        match self.results.remap_on_edit(delta) {
            Ok(stats) => Some(stats),
            Err(e) => {
                self.reporter.report(&e);
                None
            }
        }
    }

    /// Re-run analysis for every root with a remote bundle.
    pub fn start_analysis(&self) -> usize {
        let roots = self.synchronizer.roots_with_handles();
        for (root, bundle_id) in &roots {
            self.trigger_analysis(root, bundle_id.clone());
        }
        roots.len()
    }

    fn trigger_analysis(&self, root: &Path, bundle_id: BundleId) {
        let root = normalize_path(root);
        self.results.invalidate(&root);
        self.results.begin_ingest(&root);

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        self.generations.insert(root.clone(), generation);

        let task = tokio::spawn(run_analysis(
            AnalysisRun {
                root: root.clone(),
                bundle_id,
                generation,
            },
            Arc::clone(&self.generations),
            Arc::clone(&self.registry),
            Arc::clone(&self.synchronizer),
            Arc::clone(&self.results),
            self.reporter.clone(),
        ));

        if let Some(previous) = self.analyses.insert(root.clone(), task) {
            debug!("Superseding running analysis of {}", root.display());
            previous.abort();
        }
    }

    /// Wait for every analysis started so far.
    pub async fn settle(&self) {
        let roots: Vec<PathBuf> = self.analyses.iter().map(|e| e.key().clone()).collect();
        let tasks: Vec<JoinHandle<()>> = roots
            .iter()
            .filter_map(|root| self.analyses.remove(root).map(|(_, task)| task))
            .collect();

        for result in futures::future::join_all(tasks).await {
            match result {
                Err(e) if !e.is_cancelled() => warn!("Analysis task failed: {}", e),
                _ => {}
            }
        }
    }

    fn watch(&self, root: &Path) {
        let Some(watcher) = self.watcher.read().clone() else {
            return;
        };
        if let Err(e) = watcher.watch(root) {
            warn!("Cannot watch {}: {}", root.display(), e);
        }
    }

    fn unwatch(&self, root: &Path) {
        let watcher = self.watcher.read().clone();
        if let Some(watcher) = watcher {
            watcher.unwatch(root);
        }
    }

    /// Start a worker that handles submitted events in order.
    pub fn spawn_queue(self: &Arc<Self>) -> EventQueue {
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        let cancel = CancellationToken::new();

        let coordinator = Arc::clone(self);
        let token = cancel.clone();
        let worker = tokio::spawn(async move {
            loop {
                let envelope = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(envelope) => envelope,
                        None => break,
                    },
                };

                match envelope {
                    Envelope::Event(event) => coordinator.handle_event(event).await,
                    Envelope::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("Event queue stopped");
        });

        EventQueue {
            sender: EventSender { tx },
            worker,
            cancel,
        }
    }
}

struct AnalysisRun {
    root: PathBuf,
    bundle_id: BundleId,
    generation: u64,
}

async fn run_analysis(
    run: AnalysisRun,
    generations: Arc<DashMap<PathBuf, u64>>,
    registry: Arc<WorkspaceRegistry>,
    synchronizer: Arc<RemoteBundleSynchronizer>,
    results: Arc<AnalysisResultStore>,
    reporter: Reporter,
) {
    let AnalysisRun {
        root,
        bundle_id,
        generation,
    } = run;
    debug!("Analysis started for {} ({})", root.display(), bundle_id);
    let outcome = synchronizer.transport().fetch_analysis(&bundle_id).await;

    let still_current = registry.contains(&root)
        && synchronizer
            .handle(&root)
            .is_some_and(|handle| handle.bundle_id == bundle_id);
    if !still_current {
        debug!(
            "Dropping analysis of {} for superseded bundle {}",
            root.display(),
            bundle_id
        );
        // Nothing newer will clear the ingesting state
        let newest = generations
            .get(&root)
            .is_some_and(|current| *current == generation);
        if newest {
            results.invalidate(&root);
        }
        return;
    }

    match outcome {
        Ok(set) => results.ingest(&root, set),
        Err(e) => {
            results.invalidate(&root);
            reporter.report(&e);
        }
    }
}

enum Envelope {
    Event(WorkspaceEvent),
    Flush(oneshot::Sender<()>),
}

/// Submits events to a running [`EventQueue`].
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl EventSender {
    pub fn submit(&self, event: WorkspaceEvent) -> Result<()> {
        self.tx
            .send(Envelope::Event(event))
            .map_err(|_| SyncError::internal("event queue is closed"))
    }

    /// Wait until every event submitted before this call was handled.
    pub async fn flush(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Envelope::Flush(done_tx))
            .map_err(|_| SyncError::internal("event queue is closed"))?;
        done_rx
            .await
            .map_err(|_| SyncError::internal("event queue stopped before flushing"))
    }
}

/// FIFO worker around a [`ChangeCoordinator`].
pub struct EventQueue {
    sender: EventSender,
    worker: JoinHandle<()>,
    cancel: CancellationToken,
}

impl EventQueue {
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    pub fn submit(&self, event: WorkspaceEvent) -> Result<()> {
        self.sender.submit(event)
    }

    pub async fn flush(&self) -> Result<()> {
        self.sender.flush().await
    }

    /// Stop after the event in progress. Queued events are dropped.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.worker.await {
            warn!("Event queue worker failed: {}", e);
        }
    }
}
