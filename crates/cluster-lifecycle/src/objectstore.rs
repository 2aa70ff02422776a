//! Object storage for cluster artifacts
//!
//! Keys are slash-separated paths such as `<cluster-id>/logs/controller.tar.gz`.

use crate::error::CollaboratorError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, CollaboratorError>;

    /// Delete one object; `Ok(false)` when it did not exist
    async fn delete(&self, key: &str) -> Result<bool, CollaboratorError>;

    /// Every key starting with `prefix`, sorted
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, CollaboratorError>;
}

/// Object store rooted at a local directory
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, key: &str) -> Result<PathBuf, CollaboratorError> {
        let relative = Path::new(key.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)))
        {
            return Err(CollaboratorError::new(format!("invalid object key: {}", key)));
        }
        Ok(self.root.join(relative))
    }

    fn key_of(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = relative.iter().filter_map(|p| p.to_str()).collect();
        Some(parts.join("/"))
    }
}

fn io_err(e: std::io::Error) -> CollaboratorError {
    CollaboratorError::new(e.to_string())
}

#[async_trait::async_trait]
impl ObjectStore for FsObjectStore {
    async fn exists(&self, key: &str) -> Result<bool, CollaboratorError> {
        tokio::fs::try_exists(self.path(key)?).await.map_err(io_err)
    }

    async fn delete(&self, key: &str) -> Result<bool, CollaboratorError> {
        let path = self.path(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => {
                tokio::fs::remove_dir_all(&path).await.map_err(io_err)?;
            }
            Ok(_) => tokio::fs::remove_file(&path).await.map_err(io_err)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(io_err(e)),
        }
        debug!("Deleted object {}", key);
        Ok(true)
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, CollaboratorError> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_err(e)),
            };
            while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
                let path = entry.path();
                if entry.file_type().await.map_err(io_err)?.is_dir() {
                    pending.push(path);
                } else if let Some(key) = self.key_of(&path) {
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// In-memory object store
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    fail_deletes: Arc<Mutex<Vec<String>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: &str, data: &[u8]) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(key.to_string(), data.to_vec());
        }
    }

    /// Make deletes of keys containing `pattern` fail
    pub fn fail_deletes_matching(&self, pattern: &str) {
        if let Ok(mut fail) = self.fail_deletes.lock() {
            fail.push(pattern.to_string());
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn exists(&self, key: &str) -> Result<bool, CollaboratorError> {
        let objects = self.objects.lock().map_err(|e| CollaboratorError::new(e.to_string()))?;
        Ok(objects.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<bool, CollaboratorError> {
        let failing = self
            .fail_deletes
            .lock()
            .map(|f| f.iter().any(|p| key.contains(p.as_str())))
            .unwrap_or(false);
        if failing {
            return Err(CollaboratorError::new(format!("failed to delete {}", key)));
        }
        let mut objects = self.objects.lock().map_err(|e| CollaboratorError::new(e.to_string()))?;
        Ok(objects.remove(key).is_some())
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, CollaboratorError> {
        let objects = self.objects.lock().map_err(|e| CollaboratorError::new(e.to_string()))?;
        Ok(objects.keys().filter(|k| k.starts_with(prefix)).cloned().collect())
    }
}
