use std::collections::HashMap;
use std::fs;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RetrieverError;

pub const CREDENTIAL_KEY: &str = "auth";
pub const CATALOG_KEY: &str = "sensors";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: Value,
    pub stored_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    pub fn new<T: Serialize>(
        value: &T,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Self, RetrieverError> {
        let value = serde_json::to_value(value).map_err(|err| RetrieverError::Cache(err.to_string()))?;
        Ok(Self {
            value,
            stored_at: Utc::now(),
            expires_at,
        })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, RetrieverError> {
        serde_json::from_value(self.value.clone())
            .map_err(|err| RetrieverError::Cache(err.to_string()))
    }
}

/// Keyed persisted state shared across runs. Expiry is recorded, never enforced here.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, RetrieverError>;
    fn put(&self, key: &str, entry: &CacheEntry) -> Result<(), RetrieverError>;
    fn remove(&self, key: &str) -> Result<bool, RetrieverError>;
}

#[derive(Debug, Clone)]
pub struct DiskCache {
    root: Utf8PathBuf,
}

impl DiskCache {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn entry_path(&self, key: &str) -> Utf8PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

impl CacheStore for DiskCache {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, RetrieverError> {
        validate_key(key)?;
        let path = self.entry_path(key);
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| RetrieverError::Filesystem(format!("read {path}: {err}")))?;
        let entry = serde_json::from_str(&content)
            .map_err(|err| RetrieverError::Cache(format!("corrupt cache entry {path}: {err}")))?;
        Ok(Some(entry))
    }

    fn put(&self, key: &str, entry: &CacheEntry) -> Result<(), RetrieverError> {
        validate_key(key)?;
        let content =
            serde_json::to_vec_pretty(entry).map_err(|err| RetrieverError::Cache(err.to_string()))?;
        write_bytes_atomic(&self.entry_path(key), &content)
    }

    fn remove(&self, key: &str) -> Result<bool, RetrieverError> {
        validate_key(key)?;
        let path = self.entry_path(key);
        if !path.as_std_path().exists() {
            return Ok(false);
        }
        fs::remove_file(path.as_std_path())
            .map_err(|err| RetrieverError::Filesystem(err.to_string()))?;
        Ok(true)
    }
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, RetrieverError> {
        let guard = self
            .entries
            .lock()
            .map_err(|_| RetrieverError::Cache("cache lock poisoned".to_string()))?;
        Ok(guard.get(key).cloned())
    }

    fn put(&self, key: &str, entry: &CacheEntry) -> Result<(), RetrieverError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| RetrieverError::Cache("cache lock poisoned".to_string()))?;
        guard.insert(key.to_string(), entry.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, RetrieverError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| RetrieverError::Cache("cache lock poisoned".to_string()))?;
        Ok(guard.remove(key).is_some())
    }
}

/// Writes to a sibling temp file and renames it over `path`.
pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), RetrieverError> {
    let parent = path
        .parent()
        .ok_or_else(|| RetrieverError::Filesystem(format!("invalid destination path {path}")))?;
    if !parent.as_str().is_empty() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| RetrieverError::Filesystem(err.to_string()))?;
    }
    let dir = if parent.as_str().is_empty() {
        Utf8Path::new(".")
    } else {
        parent
    };
    let temp = tempfile::Builder::new()
        .prefix(".cae-retriever")
        .tempfile_in(dir.as_std_path())
        .map_err(|err| RetrieverError::Filesystem(err.to_string()))?;
    fs::write(temp.path(), content).map_err(|err| RetrieverError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| RetrieverError::Filesystem(err.to_string()))?;
    Ok(())
}

fn validate_key(key: &str) -> Result<(), RetrieverError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
    if !valid {
        return Err(RetrieverError::Cache(format!("invalid cache key: {key}")));
    }
    Ok(())
}
