//! Key/value persistence contract for inventory state.
//!
//! The pipeline only needs `get`/`set` with last-write-wins semantics. Values are JSON documents;
//! the keys in use are [`RECORDS_KEY`], [`CONTAINERS_KEY`] and [`HISTORY_KEY`]. Every failure is
//! reported as [`PipelineError::StoreUnavailable`].

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::error::{PipelineError, PipelineResult};

pub const RECORDS_KEY: &str = "records";
pub const CONTAINERS_KEY: &str = "containers";
pub const HISTORY_KEY: &str = "history";

/// Persistence collaborator for [`crate::inventory::InventoryService`].
pub trait InventoryStore: Send + Sync {
    /// The value stored under `key`, or `None` if nothing was ever stored.
    fn get(&self, key: &str) -> PipelineResult<Option<Value>>;

    /// Replace the value under `key`.
    fn set(&self, key: &str, value: Value) -> PipelineResult<()>;
}

impl<S> InventoryStore for Arc<S>
where
    S: InventoryStore + ?Sized,
{
    fn get(&self, key: &str) -> PipelineResult<Option<Value>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: Value) -> PipelineResult<()> {
        (**self).set(key, value)
    }
}

/// Process-local store for tests and one-shot tools.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InventoryStore for MemoryStore {
    fn get(&self, key: &str) -> PipelineResult<Option<Value>> {
        let map = self.inner.read().map_err(|_| PipelineError::store(key, "lock poisoned"))?;
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> PipelineResult<()> {
        let mut map = self.inner.write().map_err(|_| PipelineError::store(key, "lock poisoned"))?;
        map.insert(key.to_string(), value);
        Ok(())
    }
}

/// One JSON file per key inside a directory.
///
/// Writes go to a temporary sibling file which is then renamed over the target, so a reader never
/// sees a half-written document.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Use `dir`, creating it if needed.
    pub fn open(dir: impl AsRef<Path>) -> PipelineResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| PipelineError::store(&dir.display().to_string(), e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PipelineResult<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(PipelineError::store(key, "invalid key"));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl InventoryStore for FileStore {
    fn get(&self, key: &str) -> PipelineResult<Option<Value>> {
        let path = self.path_for(key)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PipelineError::store(key, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| PipelineError::store(key, format!("{}: {e}", path.display())))
    }

    fn set(&self, key: &str, value: Value) -> PipelineResult<()> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(&value).map_err(|e| PipelineError::store(key, e))?;
        fs::write(&tmp, bytes).map_err(|e| PipelineError::store(key, e))?;
        fs::rename(&tmp, &path).map_err(|e| PipelineError::store(key, e))?;
        tracing::debug!(key, path = %path.display(), "stored document");
        Ok(())
    }
}
