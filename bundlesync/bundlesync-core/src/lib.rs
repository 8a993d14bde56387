//! Core types and abstractions for bundlesync.
//!
//! This crate provides the data model, error taxonomy, configuration and the
//! remote transport interface shared by the bundle, analysis and coordinator
//! crates.

pub mod analysis;
pub mod config;
pub mod error;
pub mod path;
pub mod traits;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::SyncConfig;
pub use error::{ErrorKind, Result, SyncError};
pub use path::{BundlePath, BundlePathError};
pub use traits::{RemoteTransport, WireFiles};
pub use types::*;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::analysis::*;
    pub use crate::config::SyncConfig;
    pub use crate::error::{ErrorKind, Result, SyncError};
    pub use crate::path::{BundlePath, owning_root};
    pub use crate::traits::{RemoteTransport, WireFiles};
    pub use crate::types::*;
}
