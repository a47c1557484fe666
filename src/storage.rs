//! Storage collaborators: "write named blob".
//!
//! Writes never overwrite. A name that already exists is reported as
//! [`WriteError::Exists`] and the persister picks a suffixed name.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::trace;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("{0} already exists")]
    Exists(String),

    #[error("invalid artifact name {0:?}")]
    InvalidName(String),

    #[error("I/O error writing {name}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("storage rejected {0}")]
    Rejected(String),
}

impl WriteError {
    /// Whether retrying the same name can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, WriteError::Io { .. } | WriteError::Rejected(_))
    }
}

#[async_trait]
pub trait Storage: Send + Sync + 'static {
    async fn exists(&self, name: &str) -> Result<bool, WriteError>;

    /// Store `bytes` under `name`, failing with [`WriteError::Exists`] if taken.
    async fn write(&self, name: &str, bytes: &[u8]) -> Result<(), WriteError>;
}

/// Artifacts as files under a root directory.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> Result<PathBuf, WriteError> {
        let relative = Path::new(name);
        let plain = relative.components().all(|c| matches!(c, Component::Normal(_)));
        if name.is_empty() || !plain {
            return Err(WriteError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn exists(&self, name: &str) -> Result<bool, WriteError> {
        let path = self.path(name)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|source| WriteError::Io { name: name.to_string(), source })
    }

    async fn write(&self, name: &str, bytes: &[u8]) -> Result<(), WriteError> {
        let path = self.path(name)?;
        let io = |source| WriteError::Io { name: name.to_string(), source };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io)?;
        }
        let mut file = match tokio::fs::OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(WriteError::Exists(name.to_string()));
            }
            Err(e) => return Err(io(e)),
        };
        file.write_all(bytes).await.map_err(io)?;
        file.flush().await.map_err(io)?;
        trace!(path = %path.display(), bytes = bytes.len(), "Artifact written");
        Ok(())
    }
}

/// In-memory storage, shared between clones.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    blobs: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    failures: Arc<AtomicU32>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes fail with a transient error.
    pub fn fail_next_writes(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.lock().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.blobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn exists(&self, name: &str) -> Result<bool, WriteError> {
        Ok(self.lock().contains_key(name))
    }

    async fn write(&self, name: &str, bytes: &[u8]) -> Result<(), WriteError> {
        let injected = self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(WriteError::Rejected(name.to_string()));
        }
        let mut blobs = self.lock();
        if blobs.contains_key(name) {
            return Err(WriteError::Exists(name.to_string()));
        }
        blobs.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_storage_never_overwrites() {
        let root = std::env::temp_dir().join(format!("downlink-fs-{}", std::process::id()));
        let _ = tokio::fs::remove_dir_all(&root).await;
        let storage = FsStorage::new(&root);

        storage.write("text/a.txt", b"one").await.unwrap();
        assert!(storage.exists("text/a.txt").await.unwrap());
        assert!(matches!(storage.write("text/a.txt", b"two").await, Err(WriteError::Exists(_))));
        assert_eq!(tokio::fs::read(root.join("text/a.txt")).await.unwrap(), b"one");

        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn fs_storage_rejects_escaping_names() {
        let storage = FsStorage::new("/tmp/downlink-never-created");
        for name in ["../x", "/etc/passwd", "", "a/../../b"] {
            assert!(matches!(storage.write(name, b"x").await, Err(WriteError::InvalidName(_))), "{name}");
        }
    }

    #[tokio::test]
    async fn memory_storage_injects_failures() {
        let storage = MemoryStorage::new();
        storage.fail_next_writes(1);
        let err = storage.write("a", b"1").await.unwrap_err();
        assert!(err.is_transient());
        storage.write("a", b"1").await.unwrap();
        assert!(!storage.write("a", b"2").await.unwrap_err().is_transient());
        assert_eq!(storage.get("a").as_deref(), Some(&b"1"[..]));
        assert_eq!(storage.names(), vec!["a".to_string()]);
    }
}
