//! Reconciliation of local hash bundles with remote bundle handles.
//!
//! Each registered root owns a slot. Operations on one slot are serialized by
//! an async mutex (FIFO), so a second `sync` queues behind the first while
//! different roots proceed concurrently. `teardown` retires the slot and
//! cancels whatever sync is in flight before deleting the remote bundle.

use bundlesync_core::config::RemoteConfig;
use bundlesync_core::error::{Result, SyncError};
use bundlesync_core::path::{BundlePath, normalize_path};
use bundlesync_core::traits::{RemoteTransport, WireFiles};
use bundlesync_core::types::{
    BundleDelta, BundleId, ContentHash, FileHashes, RemoteBundle, RemoteBundleHandle, SyncOutcome,
    UploadFile,
};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What the remote side holds for a root versus what it should hold.
#[derive(Debug, Default)]
struct SyncLedger {
    /// Every delta applied so far
    desired: FileHashes,
    /// File set the remote bundle represents
    acknowledged: FileHashes,
    bundle_id: Option<BundleId>,
}

struct RootSlot {
    root: PathBuf,
    ledger: Mutex<SyncLedger>,
    published: RwLock<Option<RemoteBundleHandle>>,
    pending: AtomicBool,
    retired: AtomicBool,
    cancel: CancellationToken,
}

impl RootSlot {
    fn new(root: PathBuf) -> Self {
        Self {
            root,
            ledger: Mutex::new(SyncLedger::default()),
            published: RwLock::new(None),
            pending: AtomicBool::new(false),
            retired: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    fn publish(&self, ledger: &SyncLedger) {
        let handle = ledger.bundle_id.clone().map(|bundle_id| RemoteBundleHandle {
            root: self.root.clone(),
            bundle_id,
            files: ledger.acknowledged.clone(),
            pending: false,
            synced_at: Utc::now(),
        });
        *self.published.write() = handle;
    }
}

/// Holds `pending` for the lifetime of one sync, on every exit path.
struct PendingGuard<'a>(&'a AtomicBool);

impl<'a> PendingGuard<'a> {
    fn new(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns the remote bundle handle of every registered root.
pub struct RemoteBundleSynchronizer {
    transport: Arc<dyn RemoteTransport>,
    config: RemoteConfig,
    slots: DashMap<PathBuf, Arc<RootSlot>>,
}

impl RemoteBundleSynchronizer {
    pub fn new(transport: Arc<dyn RemoteTransport>, config: RemoteConfig) -> Self {
        Self {
            transport,
            config,
            slots: DashMap::new(),
        }
    }

    /// Open a slot for `root`. Supersedes an earlier teardown of the same root.
    pub fn register(&self, root: &Path) {
        let root = normalize_path(root);
        self.slots
            .entry(root.clone())
            .or_insert_with(|| {
                debug!("Synchronizer slot opened: {}", root.display());
                Arc::new(RootSlot::new(root.clone()))
            });
    }

    pub fn is_registered(&self, root: &Path) -> bool {
        self.slots.contains_key(&normalize_path(root))
    }

    fn slot(&self, root: &Path) -> Option<Arc<RootSlot>> {
        self.slots
            .get(&normalize_path(root))
            .map(|slot| Arc::clone(slot.value()))
    }

    /// Push `delta` to the remote bundle of `root`.
    ///
    /// Returns [`SyncOutcome::Skipped`] for a root that is not registered or
    /// was torn down, including a teardown that arrives while this call waits
    /// or runs.
    ///
    /// # Errors
    ///
    /// `SyncFailure` when a remote call fails or times out. The delta stays
    /// recorded and is sent again by the next sync.
    pub async fn sync(&self, root: &Path, delta: &BundleDelta) -> Result<SyncOutcome> {
        let Some(slot) = self.slot(root) else {
            debug!("Sync refused for unregistered root {}", root.display());
            return Ok(SyncOutcome::Skipped);
        };

        let mut ledger = slot.ledger.lock().await;
        if slot.is_retired() {
            debug!("Sync refused after teardown: {}", slot.root.display());
            return Ok(SyncOutcome::Skipped);
        }

        let _pending = PendingGuard::new(&slot.pending);
        delta.apply_to(&mut ledger.desired);

        let timeout = self.config.request_timeout();
        let outcome = tokio::select! {
            _ = slot.cancel.cancelled() => {
                info!("Sync cancelled by teardown: {}", slot.root.display());
                return Ok(SyncOutcome::Skipped);
            }
            result = tokio::time::timeout(timeout, self.reconcile(&slot.root, &mut ledger)) => {
                match result {
                    Ok(outcome) => outcome,
                    Err(_) => Err(SyncError::timeout(format!("no answer within {:?}", timeout))),
                }
            }
        };

        match outcome {
            Ok(outcome) => {
                if outcome.changed_bundle().is_some() {
                    slot.publish(&ledger);
                }
                Ok(outcome)
            }
            Err(e) => {
                warn!("Sync failed for {}: {}", slot.root.display(), e);
                Err(SyncError::sync_failure(&slot.root, e.to_string()))
            }
        }
    }

    async fn reconcile(&self, root: &Path, ledger: &mut SyncLedger) -> Result<SyncOutcome> {
        let pending = BundleDelta::between(&ledger.acknowledged, &ledger.desired);

        let (remote, created) = match &ledger.bundle_id {
            Some(bundle_id) if pending.is_empty() => {
                debug!("Remote bundle {} already current", bundle_id);
                return Ok(SyncOutcome::Unchanged {
                    bundle_id: bundle_id.clone(),
                });
            }
            Some(bundle_id) => {
                let files = to_wire(root, pending.added.iter().chain(pending.changed.iter()))?;
                let removed = to_wire(root, pending.removed.iter())?
                    .into_keys()
                    .collect::<Vec<_>>();
                info!(
                    "Extending bundle {} for {}: {} files, {} removed",
                    bundle_id,
                    root.display(),
                    files.len(),
                    removed.len()
                );
                let remote = self
                    .transport
                    .extend_bundle(bundle_id, &files, &removed)
                    .await?;
                (remote, false)
            }
            None if ledger.desired.is_empty() => {
                debug!("Nothing to bundle under {}", root.display());
                return Ok(SyncOutcome::Skipped);
            }
            None => {
                let files = to_wire(root, ledger.desired.iter())?;
                info!("Creating bundle for {}: {} files", root.display(), files.len());
                (self.transport.create_bundle(&files).await?, true)
            }
        };

        let (uploaded, skipped) = self.upload_missing(root, &remote, &ledger.desired).await?;

        // Skipped files count as unsent so the next delta carries them again
        ledger.acknowledged = ledger.desired.clone();
        for path in &skipped {
            ledger.acknowledged.remove(path);
        }
        ledger.bundle_id = Some(remote.bundle_id.clone());

        info!(
            "Bundle {} synced for {} ({} uploaded)",
            remote.bundle_id,
            root.display(),
            uploaded
        );
        Ok(SyncOutcome::Synced {
            bundle_id: remote.bundle_id,
            created,
            uploaded,
        })
    }

    /// Upload the files the remote side lacks, as long as their content still
    /// hashes to what was declared. Returns the upload count and the files
    /// skipped for a hash mismatch.
    async fn upload_missing(
        &self,
        root: &Path,
        remote: &RemoteBundle,
        declared: &FileHashes,
    ) -> Result<(usize, Vec<PathBuf>)> {
        let batch_size = self.config.upload_batch_size.max(1);
        let mut uploaded = 0;
        let mut skipped = Vec::new();

        for chunk in remote.missing_files.chunks(batch_size) {
            let mut batch = Vec::with_capacity(chunk.len());
            for path in chunk {
                let physical = path.to_physical(root);
                match tokio::fs::read(&physical).await {
                    Ok(content) => {
                        let hash = ContentHash::of(&content);
                        if declared.get(&physical) != Some(&hash) {
                            warn!(
                                "{} changed since it was hashed; not uploading",
                                physical.display()
                            );
                            skipped.push(physical);
                            continue;
                        }
                        batch.push(UploadFile {
                            path: path.clone(),
                            hash,
                            content,
                        });
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        warn!("Missing file vanished before upload: {}", physical.display());
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            if batch.is_empty() {
                continue;
            }
            self.transport.upload_files(&remote.bundle_id, &batch).await?;
            uploaded += batch.len();
        }

        Ok((uploaded, skipped))
    }

    /// Delete the remote bundle of `root` and drop its local state.
    ///
    /// Any sync in flight for the root is cancelled, and later syncs are
    /// refused until the root is registered again.
    ///
    /// # Errors
    ///
    /// `SyncFailure` when remote deletion fails or times out. Local state is
    /// cleared regardless.
    pub async fn teardown(&self, root: &Path) -> Result<()> {
        let root = normalize_path(root);
        let Some((_, slot)) = self.slots.remove(&root) else {
            debug!("Teardown of unknown root {}", root.display());
            return Ok(());
        };

        slot.retired.store(true, Ordering::SeqCst);
        slot.cancel.cancel();

        let mut ledger = slot.ledger.lock().await;
        slot.published.write().take();
        let Some(bundle_id) = ledger.bundle_id.take() else {
            info!("Torn down {} (no remote bundle)", root.display());
            return Ok(());
        };
        ledger.desired.clear();
        ledger.acknowledged.clear();

        let timeout = self.config.teardown_timeout();
        match tokio::time::timeout(timeout, self.transport.delete_bundle(&bundle_id)).await {
            Ok(Ok(())) => {
                info!("Remote bundle {} deleted for {}", bundle_id, root.display());
                Ok(())
            }
            Ok(Err(e)) => {
                warn!("Failed to delete remote bundle {}: {}", bundle_id, e);
                Err(SyncError::sync_failure(
                    &root,
                    format!("remote deletion of {} failed: {}", bundle_id, e),
                ))
            }
            Err(_) => {
                warn!("Remote deletion of {} timed out", bundle_id);
                Err(SyncError::sync_failure(
                    &root,
                    format!("remote deletion of {} timed out after {:?}", bundle_id, timeout),
                ))
            }
        }
    }

    /// Adopt a remote bundle obtained outside the synchronizer.
    ///
    /// The bundle is taken to represent every delta applied so far.
    pub async fn set_handle(&self, root: &Path, remote: RemoteBundle) -> Result<()> {
        let slot = self
            .slot(root)
            .ok_or_else(|| SyncError::stale_root(normalize_path(root)))?;

        let mut ledger = slot.ledger.lock().await;
        if slot.is_retired() {
            return Err(SyncError::stale_root(&slot.root));
        }
        ledger.acknowledged = ledger.desired.clone();
        ledger.bundle_id = Some(remote.bundle_id);
        slot.publish(&ledger);

        debug!("Adopted remote bundle for {}", slot.root.display());
        Ok(())
    }

    /// Current remote handle of `root`, with its live `pending` flag.
    pub fn handle(&self, root: &Path) -> Option<RemoteBundleHandle> {
        let slot = self.slot(root)?;
        let mut handle = slot.published.read().clone()?;
        handle.pending = slot.pending.load(Ordering::SeqCst);
        Some(handle)
    }

    /// Whether a sync for `root` is in flight.
    pub fn is_pending(&self, root: &Path) -> bool {
        self.slot(root)
            .is_some_and(|slot| slot.pending.load(Ordering::SeqCst))
    }

    /// True when `root` has no remote handle.
    pub fn is_empty(&self, root: &Path) -> bool {
        self.handle(root).is_none()
    }

    /// True when no root has a remote handle.
    pub fn all_empty(&self) -> bool {
        self.slots
            .iter()
            .all(|slot| slot.value().published.read().is_none())
    }

    /// Roots that currently hold a remote handle.
    pub fn roots_with_handles(&self) -> Vec<(PathBuf, BundleId)> {
        self.slots
            .iter()
            .filter_map(|slot| {
                let handle = slot.value().published.read();
                handle
                    .as_ref()
                    .map(|h| (slot.key().clone(), h.bundle_id.clone()))
            })
            .collect()
    }

    pub fn transport(&self) -> &Arc<dyn RemoteTransport> {
        &self.transport
    }
}

fn to_wire<'a, I>(root: &Path, files: I) -> Result<WireFiles>
where
    I: IntoIterator<Item = (&'a PathBuf, &'a ContentHash)>,
{
    files
        .into_iter()
        .map(|(path, hash)| {
            BundlePath::from_physical(path, root)
                .map(|wire| (wire, *hash))
                .map_err(|e| SyncError::bundle_corruption(root, e.to_string()))
        })
        .collect()
}
