//! JSON file persistence for snapshots and subscribers.
//!
//! Every write goes to a `*.tmp` sibling first, is fsynced, then renamed over
//! the target, so a reader never sees a half-written file.
//!
//! ## Disk Layout
//!
//! ```text
//! {data_dir}/
//!   baseline.json      # Snapshot used as the old side of the next diff
//!   current.json       # Latest raw capture, kept for diagnostics
//!   subscribers.json   # { userId: { confirm, strikes, courses } }
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::catalog::Snapshot;
use crate::registry::{Subscriber, UserId};

const BASELINE_FILE: &str = "baseline.json";
const CURRENT_FILE: &str = "current.json";
const SUBSCRIBERS_FILE: &str = "subscribers.json";

/// Errors from the file stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Persists and retrieves catalog snapshots.
pub trait SnapshotStore: Send + Sync {
    /// Loads the baseline, or `None` if none has been saved yet.
    fn load_baseline(&self) -> Result<Option<Snapshot>, StoreError>;

    /// Replaces the baseline. Must be atomic.
    fn save_baseline(&self, snapshot: &Snapshot) -> Result<(), StoreError>;

    /// Records the latest raw capture.
    fn save_current(&self, snapshot: &Snapshot) -> Result<(), StoreError>;
}

/// Persists the subscriber table.
pub trait SubscriberStore: Send + Sync {
    fn load(&self) -> Result<BTreeMap<UserId, Subscriber>, StoreError>;

    fn save(&self, subscribers: &BTreeMap<UserId, Subscriber>) -> Result<(), StoreError>;
}

/// Fsync a file to ensure its contents are durable on disk.
fn sync_file(path: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::OpenOptions::new().write(true).open(path)?;
    f.sync_all()
}

/// Fsync a directory so a rename inside it is durable.
#[allow(clippy::unnecessary_wraps)]
fn sync_dir(path: &Path) -> Result<(), std::io::Error> {
    #[cfg(unix)]
    {
        let f = std::fs::File::open(path)?;
        f.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

/// Serializes `value` as pretty JSON and atomically replaces `path`.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(value)?;
    let tmp_path = path.with_extension("json.tmp");

    std::fs::write(&tmp_path, &json)?;
    sync_file(&tmp_path)?;
    std::fs::rename(&tmp_path, path)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        sync_dir(parent)?;
    }

    debug!(path = %path.display(), bytes = json.len(), "Wrote JSON file");
    Ok(())
}

/// Reads a JSON file, returning `None` if it does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let content = match std::fs::read(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&content)?))
}

/// Snapshot store backed by JSON files in one directory.
pub struct JsonSnapshotStore {
    base_dir: PathBuf,
}

impl JsonSnapshotStore {
    /// Creates the store, creating `base_dir` if needed.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    fn baseline_path(&self) -> PathBuf {
        self.base_dir.join(BASELINE_FILE)
    }

    fn current_path(&self) -> PathBuf {
        self.base_dir.join(CURRENT_FILE)
    }
}

impl SnapshotStore for JsonSnapshotStore {
    fn load_baseline(&self) -> Result<Option<Snapshot>, StoreError> {
        read_json(&self.baseline_path())
    }

    fn save_baseline(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        write_json_atomic(&self.baseline_path(), snapshot)
    }

    fn save_current(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        write_json_atomic(&self.current_path(), snapshot)
    }
}

/// Subscriber store backed by a single JSON file.
pub struct JsonSubscriberStore {
    path: PathBuf,
}

impl JsonSubscriberStore {
    /// Creates a store writing `subscribers.json` under `base_dir`.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        std::fs::create_dir_all(base_dir.as_ref())?;
        Ok(Self {
            path: base_dir.as_ref().join(SUBSCRIBERS_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SubscriberStore for JsonSubscriberStore {
    fn load(&self) -> Result<BTreeMap<UserId, Subscriber>, StoreError> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }

    fn save(&self, subscribers: &BTreeMap<UserId, Subscriber>) -> Result<(), StoreError> {
        write_json_atomic(&self.path, subscribers)
    }
}
