//! Practice data persistence
//!
//! The coordinator reads and writes four named JSON blobs. The store treats
//! them as opaque; shape checking happens when they are deserialized.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    Progress,
    Sessions,
    Achievements,
    Recordings,
}

impl StoreKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::Progress => "progress",
            StoreKey::Sessions => "sessions",
            StoreKey::Achievements => "achievements",
            StoreKey::Recordings => "recordings",
        }
    }
}

/// Key-value store of JSON blobs
pub trait ProgressStore: Send + Sync {
    fn load(&self, key: StoreKey) -> Result<Option<serde_json::Value>>;

    fn save(&self, key: StoreKey, value: serde_json::Value) -> Result<()>;
}

/// Load and deserialize a blob
pub fn load_blob<T: DeserializeOwned>(store: &dyn ProgressStore, key: StoreKey) -> Result<Option<T>> {
    match store.load(key)? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| Error::Store(format!("{} blob is malformed: {}", key.as_str(), e))),
        None => Ok(None),
    }
}

pub fn save_blob<T: Serialize>(store: &dyn ProgressStore, key: StoreKey, value: &T) -> Result<()> {
    store.save(key, serde_json::to_value(value)?)
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<StoreKey, serde_json::Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressStore for MemoryStore {
    fn load(&self, key: StoreKey) -> Result<Option<serde_json::Value>> {
        Ok(self.blobs.lock().unwrap_or_else(|e| e.into_inner()).get(&key).cloned())
    }

    fn save(&self, key: StoreKey, value: serde_json::Value) -> Result<()> {
        self.blobs.lock().unwrap_or_else(|e| e.into_inner()).insert(key, value);
        Ok(())
    }
}

/// One `<key>.json` file per blob under a directory
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Creates the directory if needed
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: StoreKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.as_str()))
    }
}

impl ProgressStore for JsonFileStore {
    fn load(&self, key: StoreKey) -> Result<Option<serde_json::Value>> {
        let path = self.path(key);
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write to a temp file then rename over the old blob
    fn save(&self, key: StoreKey, value: serde_json::Value) -> Result<()> {
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&value)?)?;
        std::fs::rename(&tmp, &path)?;
        debug!("Saved {}", path.display());
        Ok(())
    }
}
