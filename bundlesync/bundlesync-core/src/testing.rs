//! In-memory [`RemoteTransport`] for tests.
//!
//! Keeps bundles and uploaded contents in memory, records every call, and can
//! be told to fail or to stall so tests can exercise the failure and
//! cancellation paths of the synchronizer.

use crate::analysis::AnalysisResultSet;
use crate::error::{Result, SyncError};
use crate::path::BundlePath;
use crate::traits::{RemoteTransport, WireFiles};
use crate::types::{BundleId, ContentHash, RemoteBundle, UploadFile};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Create { files: usize },
    Extend { from: BundleId, files: usize, removed: usize },
    Upload { bundle_id: BundleId, files: usize },
    Delete { bundle_id: BundleId },
    Analysis { bundle_id: BundleId },
}

#[derive(Default)]
struct MemoryState {
    bundles: HashMap<BundleId, WireFiles>,
    contents: HashSet<ContentHash>,
    calls: Vec<TransportCall>,
    failing: bool,
    fail_deletes: bool,
    latency: Option<Duration>,
    analysis: AnalysisResultSet,
}

/// Transport that keeps all remote state in memory.
#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
    next_id: AtomicU64,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make create/extend/upload/analysis calls fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }

    /// Make delete calls fail until reset.
    pub fn set_fail_deletes(&self, fail: bool) {
        self.state.lock().fail_deletes = fail;
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().latency = latency;
    }

    /// Result set returned by `fetch_analysis`.
    pub fn set_analysis(&self, analysis: AnalysisResultSet) {
        self.state.lock().analysis = analysis;
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.state.lock().calls.clone()
    }

    pub fn bundle(&self, bundle_id: &BundleId) -> Option<WireFiles> {
        self.state.lock().bundles.get(bundle_id).cloned()
    }

    pub fn bundle_count(&self) -> usize {
        self.state.lock().bundles.len()
    }

    pub fn has_content(&self, hash: &ContentHash) -> bool {
        self.state.lock().contents.contains(hash)
    }

    async fn enter(&self, call: TransportCall) -> Result<()> {
        let latency = {
            let mut state = self.state.lock();
            state.calls.push(call);
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }

    fn check_failing(&self) -> Result<()> {
        if self.state.lock().failing {
            return Err(SyncError::transport("memory transport set to fail"));
        }
        Ok(())
    }

    fn next_bundle_id(&self) -> BundleId {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        BundleId::new(format!("bundle-{n}"))
    }

    fn store(&self, files: WireFiles) -> RemoteBundle {
        let bundle_id = self.next_bundle_id();
        let mut state = self.state.lock();
        let missing_files = files
            .iter()
            .filter(|(_, hash)| !state.contents.contains(hash))
            .map(|(path, _)| path.clone())
            .collect();
        state.bundles.insert(bundle_id.clone(), files);
        RemoteBundle {
            bundle_id,
            missing_files,
        }
    }
}

#[async_trait]
impl RemoteTransport for MemoryTransport {
    async fn create_bundle(&self, files: &WireFiles) -> Result<RemoteBundle> {
        self.enter(TransportCall::Create { files: files.len() }).await?;
        self.check_failing()?;
        Ok(self.store(files.clone()))
    }

    async fn extend_bundle(
        &self,
        bundle_id: &BundleId,
        files: &WireFiles,
        removed: &[BundlePath],
    ) -> Result<RemoteBundle> {
        self.enter(TransportCall::Extend {
            from: bundle_id.clone(),
            files: files.len(),
            removed: removed.len(),
        })
        .await?;
        self.check_failing()?;

        let mut next = self
            .bundle(bundle_id)
            .ok_or_else(|| SyncError::not_found("bundle", bundle_id.as_str()))?;
        for path in removed {
            next.remove(path);
        }
        next.extend(files.iter().map(|(p, h)| (p.clone(), *h)));

        Ok(self.store(next))
    }

    async fn upload_files(&self, bundle_id: &BundleId, files: &[UploadFile]) -> Result<()> {
        self.enter(TransportCall::Upload {
            bundle_id: bundle_id.clone(),
            files: files.len(),
        })
        .await?;
        self.check_failing()?;

        let mut state = self.state.lock();
        for file in files {
            if ContentHash::of(&file.content) != file.hash {
                return Err(SyncError::transport(format!(
                    "content of {} does not match its hash",
                    file.path
                )));
            }
            state.contents.insert(file.hash);
        }
        Ok(())
    }

    async fn delete_bundle(&self, bundle_id: &BundleId) -> Result<()> {
        self.enter(TransportCall::Delete {
            bundle_id: bundle_id.clone(),
        })
        .await?;

        let mut state = self.state.lock();
        if state.fail_deletes {
            return Err(SyncError::transport("memory transport set to fail deletes"));
        }
        state
            .bundles
            .remove(bundle_id)
            .map(|_| ())
            .ok_or_else(|| SyncError::not_found("bundle", bundle_id.as_str()))
    }

    async fn fetch_analysis(&self, bundle_id: &BundleId) -> Result<AnalysisResultSet> {
        self.enter(TransportCall::Analysis {
            bundle_id: bundle_id.clone(),
        })
        .await?;
        self.check_failing()?;
        Ok(self.state.lock().analysis.clone())
    }
}
