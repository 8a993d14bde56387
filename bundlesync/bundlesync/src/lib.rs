//! Keeps workspace folders synchronized with a remote analysis service.
//!
//! Folders are hashed into content-addressed bundles, mirrored to the remote
//! side as bundle deltas, and the findings that come back are kept aligned
//! with local edits. [`SyncContext`] wires the components together;
//! [`ChangeCoordinator`] is the single ingress for workspace events.

pub mod context;
pub mod coordinator;
pub mod logging;
pub mod watcher;

pub use context::SyncContext;
pub use coordinator::{
    ChangeCoordinator, ErrorSink, EventQueue, EventSender, FolderChange, WorkspaceEvent,
};
pub use logging::init_logging;
pub use watcher::{FileEvent, FolderWatcher};

pub use bundlesync_analysis::{AnalysisResultStore, RemapStats, ResultState};
pub use bundlesync_bundle::{
    HashBundle, HashBundleStore, RemoteBundleSynchronizer, WorkspaceRegistry, WorkspaceRoot,
};
pub use bundlesync_core::{Result, SyncConfig, SyncError};
