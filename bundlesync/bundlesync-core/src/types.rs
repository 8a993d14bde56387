//! Bundle and remote handle types.

use crate::path::BundlePath;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Fixed-size content digest of a file.
///
/// Serialized as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hash a byte slice.
    pub fn of(content: &[u8]) -> Self {
        Self(*blake3::hash(content).as_bytes())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from_bytes(self.0).to_hex().to_string()
    }

    /// Parse a 64 character hex digest.
    pub fn from_hex(hex: &str) -> Option<Self> {
        blake3::Hash::from_hex(hex).ok().map(|h| Self(*h.as_bytes()))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps delta dumps readable
        write!(f, "ContentHash({})", &self.to_hex()[..12])
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Self::from_hex(&hex)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid content hash: {hex}")))
    }
}

/// File path to content hash mapping, keyed by absolute path.
pub type FileHashes = BTreeMap<PathBuf, ContentHash>;

/// Difference between two bundle snapshots.
///
/// `removed` carries the hash the path had before it disappeared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleDelta {
    pub added: FileHashes,
    pub changed: FileHashes,
    pub removed: FileHashes,
}

impl BundleDelta {
    /// Compute the delta that turns `previous` into `current`.
    pub fn between(previous: &FileHashes, current: &FileHashes) -> Self {
        let mut delta = Self::default();

        for (path, hash) in current {
            match previous.get(path) {
                None => {
                    delta.added.insert(path.clone(), *hash);
                }
                Some(old) if old != hash => {
                    delta.changed.insert(path.clone(), *hash);
                }
                Some(_) => {}
            }
        }

        for (path, hash) in previous {
            if !current.contains_key(path) {
                delta.removed.insert(path.clone(), *hash);
            }
        }

        delta
    }

    /// Apply this delta to a file set.
    pub fn apply_to(&self, files: &mut FileHashes) {
        for path in self.removed.keys() {
            files.remove(path);
        }
        for (path, hash) in self.added.iter().chain(self.changed.iter()) {
            files.insert(path.clone(), *hash);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    /// Total number of touched paths.
    pub fn len(&self) -> usize {
        self.added.len() + self.changed.len() + self.removed.len()
    }
}

/// Opaque identifier the remote service assigns to a bundle version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleId(pub String);

impl BundleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remote answer to a bundle create or extend call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteBundle {
    pub bundle_id: BundleId,
    /// Files whose content the remote side does not hold yet
    #[serde(default)]
    pub missing_files: Vec<BundlePath>,
}

/// Local record of the remote bundle that represents a workspace root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteBundleHandle {
    pub root: PathBuf,
    pub bundle_id: BundleId,
    /// File-hash pairs the remote bundle currently represents
    pub files: FileHashes,
    /// True while a sync for this root is in flight
    pub pending: bool,
    pub synced_at: DateTime<Utc>,
}

/// File content sent to the remote side for a missing hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadFile {
    pub path: BundlePath,
    pub hash: ContentHash,
    pub content: Vec<u8>,
}

/// Result of one synchronizer `sync` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The remote bundle was created or extended
    Synced {
        bundle_id: BundleId,
        created: bool,
        uploaded: usize,
    },
    /// Nothing differed from what the remote handle already represents
    Unchanged { bundle_id: BundleId },
    /// Nothing was sent: the root was torn down, or has no files and no handle yet
    Skipped,
}

impl SyncOutcome {
    /// Bundle id after a sync that changed remote state.
    pub fn changed_bundle(&self) -> Option<&BundleId> {
        match self {
            Self::Synced { bundle_id, .. } => Some(bundle_id),
            _ => None,
        }
    }
}
