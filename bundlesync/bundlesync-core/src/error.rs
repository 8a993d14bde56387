//! Error types for bundle synchronization.

use std::path::{Path, PathBuf};

/// Result type alias for bundlesync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Main error type for bundle synchronization.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A remote call for a pending sync failed
    #[error("Sync failed for {root}: {reason}")]
    SyncFailure { root: PathBuf, reason: String },

    /// The targeted workspace root was removed while the operation was running
    #[error("Workspace root is no longer registered: {0}")]
    StaleRootOperation(PathBuf),

    /// Local hash computation failed or produced an inconsistent bundle
    #[error("Bundle corruption in {root}: {reason}")]
    BundleCorruption { root: PathBuf, reason: String },

    /// An edit referenced a file with no current results
    #[error("No analysis results for {0}")]
    RemapOutOfRange(PathBuf),

    /// Remote transport errors outside of a sync (teardown, analysis)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Not found errors
    #[error("Not found: {resource} {id}")]
    NotFound { resource: String, id: String },

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// Wrapped anyhow errors for transports built on anyhow
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Flat classification of [`SyncError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SyncFailure,
    StaleRootOperation,
    BundleCorruption,
    RemapOutOfRange,
    Transport,
    Config,
    Io,
    Serialization,
    InvalidInput,
    NotFound,
    Timeout,
    Internal,
}

impl SyncError {
    /// Create a new sync failure for a root
    pub fn sync_failure(root: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::SyncFailure {
            root: root.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Create a new stale root error
    pub fn stale_root(root: impl AsRef<Path>) -> Self {
        Self::StaleRootOperation(root.as_ref().to_path_buf())
    }

    /// Create a new bundle corruption error
    pub fn bundle_corruption(root: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::BundleCorruption {
            root: root.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Create a new transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new not found error
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SyncFailure { .. } => ErrorKind::SyncFailure,
            Self::StaleRootOperation(_) => ErrorKind::StaleRootOperation,
            Self::BundleCorruption { .. } => ErrorKind::BundleCorruption,
            Self::RemapOutOfRange(_) => ErrorKind::RemapOutOfRange,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Internal(_) | Self::Other(_) => ErrorKind::Internal,
        }
    }

    /// Whether the error should reach the error-reporting collaborator.
    ///
    /// Stale-root operations and remaps without results are expected outcomes
    /// and are never surfaced.
    pub fn is_reportable(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::StaleRootOperation | ErrorKind::RemapOutOfRange
        )
    }

    /// Check if this is a stale root error
    pub fn is_stale_root(&self) -> bool {
        matches!(self, Self::StaleRootOperation(_))
    }

    /// Check if this is a sync failure
    pub fn is_sync_failure(&self) -> bool {
        matches!(self, Self::SyncFailure { .. })
    }
}
