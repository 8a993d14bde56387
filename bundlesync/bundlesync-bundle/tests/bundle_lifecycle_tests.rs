//! Bundle lifecycle tests
//!
//! Exercises registry, hash store and synchronizer together against the
//! in-memory transport:
//! - Full scan followed by create
//! - Incremental update followed by extend
//! - Removal with remote deletion
//! - Concurrent syncs for one root queueing in order

use bundlesync_bundle::{BundleScanner, HashBundleStore, RemoteBundleSynchronizer, WorkspaceRegistry};
use bundlesync_core::config::{BundleConfig, RemoteConfig};
use bundlesync_core::testing::{MemoryTransport, TransportCall};
use bundlesync_core::types::{BundleDelta, SyncOutcome};
use bundlesync_core::BundlePath;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    registry: Arc<WorkspaceRegistry>,
    store: HashBundleStore,
    sync: Arc<RemoteBundleSynchronizer>,
    transport: Arc<MemoryTransport>,
}

fn harness() -> Harness {
    let registry = Arc::new(WorkspaceRegistry::new());
    let transport = Arc::new(MemoryTransport::new());
    let store = HashBundleStore::new(
        Arc::clone(&registry),
        BundleScanner::new(BundleConfig::default()),
    );
    let sync = Arc::new(RemoteBundleSynchronizer::new(
        transport.clone(),
        RemoteConfig::default(),
    ));
    Harness {
        registry,
        store,
        sync,
        transport,
    }
}

fn create_test_project(root: &Path) {
    fs::create_dir_all(root.join("src")).unwrap();
    fs::write(root.join("src/main.js"), "console.log('main');\n").unwrap();
    fs::write(root.join("src/util.js"), "export const x = 1;\n").unwrap();
    fs::write(root.join("README.md"), "# project\n").unwrap();
}

impl Harness {
    fn add(&self, root: &Path) {
        self.registry.add_root(root);
        self.sync.register(root);
    }
}

#[tokio::test]
async fn test_scan_then_create() {
    let dir = TempDir::new().unwrap();
    create_test_project(dir.path());
    let h = harness();
    h.add(dir.path());

    let delta = h.store.update_bundle(dir.path(), None).await.unwrap();
    assert_eq!(delta.added.len(), 3);

    let outcome = h.sync.sync(dir.path(), &delta).await.unwrap();
    let SyncOutcome::Synced { bundle_id, created, uploaded } = outcome else {
        panic!("expected a synced outcome, got {:?}", outcome);
    };
    assert!(created);
    assert_eq!(uploaded, 3);

    let remote = h.transport.bundle(&bundle_id).unwrap();
    assert!(remote.contains_key(&BundlePath::new("/src/main.js").unwrap()));
    assert!(remote.contains_key(&BundlePath::new("/README.md").unwrap()));
}

#[tokio::test]
async fn test_edit_then_extend() {
    let dir = TempDir::new().unwrap();
    create_test_project(dir.path());
    let h = harness();
    h.add(dir.path());

    let delta = h.store.update_bundle(dir.path(), None).await.unwrap();
    h.sync.sync(dir.path(), &delta).await.unwrap();

    let main = dir.path().join("src/main.js");
    let util = dir.path().join("src/util.js");
    fs::write(&main, "console.log('changed');\n").unwrap();
    fs::remove_file(&util).unwrap();

    let delta = h
        .store
        .update_bundle(dir.path(), Some(vec![main, util]))
        .await
        .unwrap();
    assert_eq!(delta.changed.len(), 1);
    assert_eq!(delta.removed.len(), 1);

    let outcome = h.sync.sync(dir.path(), &delta).await.unwrap();
    let bundle_id = outcome.changed_bundle().unwrap().clone();
    assert!(matches!(outcome, SyncOutcome::Synced { created: false, uploaded: 1, .. }));

    let remote = h.transport.bundle(&bundle_id).unwrap();
    assert_eq!(remote.len(), 2);
    assert!(!remote.contains_key(&BundlePath::new("/src/util.js").unwrap()));
}

#[tokio::test]
async fn test_removal_clears_everything() {
    let dir = TempDir::new().unwrap();
    create_test_project(dir.path());
    let h = harness();
    h.add(dir.path());

    let delta = h.store.update_bundle(dir.path(), None).await.unwrap();
    h.sync.sync(dir.path(), &delta).await.unwrap();

    h.registry.remove_root(dir.path());
    h.sync.teardown(dir.path()).await.unwrap();
    h.store.remove_bundle(dir.path());

    assert!(h.store.all_empty());
    assert!(h.sync.all_empty());
    assert_eq!(h.transport.bundle_count(), 0);
    assert!(
        h.transport
            .calls()
            .iter()
            .any(|call| matches!(call, TransportCall::Delete { .. }))
    );
}

#[tokio::test]
async fn test_syncs_for_one_root_queue_in_order() {
    let dir = TempDir::new().unwrap();
    create_test_project(dir.path());
    let h = harness();
    h.add(dir.path());
    h.transport.set_latency(Some(Duration::from_millis(20)));

    let delta = h.store.update_bundle(dir.path(), None).await.unwrap();

    let first = {
        let sync = Arc::clone(&h.sync);
        let root = dir.path().to_path_buf();
        tokio::spawn(async move { sync.sync(&root, &delta).await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = {
        let sync = Arc::clone(&h.sync);
        let root = dir.path().to_path_buf();
        tokio::spawn(async move { sync.sync(&root, &BundleDelta::default()).await })
    };

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();

    assert!(matches!(first, SyncOutcome::Synced { created: true, .. }));
    assert_eq!(
        second,
        SyncOutcome::Unchanged {
            bundle_id: first.changed_bundle().unwrap().clone()
        }
    );
    assert!(!h.sync.is_pending(dir.path()));
}

#[tokio::test]
async fn test_update_after_removal_is_stale() {
    let dir = TempDir::new().unwrap();
    create_test_project(dir.path());
    let h = harness();
    h.add(dir.path());

    h.registry.remove_root(dir.path());
    let err = h.store.update_bundle(dir.path(), None).await.unwrap_err();
    assert!(err.is_stale_root());
    assert!(!err.is_reportable());
}
