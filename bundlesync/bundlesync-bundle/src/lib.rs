//! Workspace roots, content-hash bundles and remote bundle reconciliation.
//!
//! - [`WorkspaceRegistry`] tracks registered roots and the active one
//! - [`HashBundleStore`] keeps a content hash per file of every root
//! - [`RemoteBundleSynchronizer`] mirrors bundle deltas to the remote service

pub mod registry;
pub mod scanner;
pub mod store;
pub mod synchronizer;

pub use registry::{WorkspaceRegistry, WorkspaceRoot};
pub use scanner::{BundleScanner, hash_file};
pub use store::{HashBundle, HashBundleStore};
pub use synchronizer::RemoteBundleSynchronizer;
