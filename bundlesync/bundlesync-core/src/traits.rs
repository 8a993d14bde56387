//! Interfaces to the collaborators this workspace does not implement.

use crate::analysis::AnalysisResultSet;
use crate::error::Result;
use crate::path::BundlePath;
use crate::types::{BundleId, ContentHash, RemoteBundle, UploadFile};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Root-relative file set as it travels to the remote side.
pub type WireFiles = BTreeMap<BundlePath, ContentHash>;

/// Trait for the remote analysis service transport.
///
/// Implementations own authentication and wire encoding; the synchronizer
/// only relies on the bundle lifecycle below.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Create a new remote bundle holding `files`
    async fn create_bundle(&self, files: &WireFiles) -> Result<RemoteBundle>;

    /// Derive a new bundle from `bundle_id` with `files` added or replaced and `removed` dropped
    async fn extend_bundle(
        &self,
        bundle_id: &BundleId,
        files: &WireFiles,
        removed: &[BundlePath],
    ) -> Result<RemoteBundle>;

    /// Upload contents the remote side reported as missing
    async fn upload_files(&self, bundle_id: &BundleId, files: &[UploadFile]) -> Result<()>;

    /// Delete a remote bundle
    async fn delete_bundle(&self, bundle_id: &BundleId) -> Result<()>;

    /// Run (or poll) the analysis of a bundle until it completes
    async fn fetch_analysis(&self, bundle_id: &BundleId) -> Result<AnalysisResultSet>;
}
