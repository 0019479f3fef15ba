//! Storage for uploaded files, keyed by `file_key`
//!
//! Keys are `/`-separated relative paths (`{tenant}/{sha256}/{file name}`).

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tally_common::{Error, Result};
use tokio::sync::RwLock;

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, file_key: &str, bytes: &[u8]) -> Result<()>;
    async fn get(&self, file_key: &str) -> Result<Option<Vec<u8>>>;
    async fn delete(&self, file_key: &str) -> Result<()>;
}

/// Files under a root folder
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, file_key: &str) -> Result<PathBuf> {
        let relative = Path::new(file_key);
        let clean = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if file_key.is_empty() || !clean {
            return Err(Error::InvalidInput(format!("Invalid file key: {}", file_key)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, file_key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(file_key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        tracing::debug!(file_key, bytes = bytes.len(), "Blob stored");
        Ok(())
    }

    async fn get(&self, file_key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(file_key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, file_key: &str) -> Result<()> {
        let path = self.path_for(file_key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local store for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, file_key: &str, bytes: &[u8]) -> Result<()> {
        self.blobs.write().await.insert(file_key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, file_key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.read().await.get(file_key).cloned())
    }

    async fn delete(&self, file_key: &str) -> Result<()> {
        self.blobs.write().await.remove(file_key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fs_store_round_trip_and_missing() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());

        store.put("t1/abc/file.csv", b"a,b\n1,2\n").await.unwrap();
        assert_eq!(store.get("t1/abc/file.csv").await.unwrap().unwrap(), b"a,b\n1,2\n");
        assert!(store.get("t1/other.csv").await.unwrap().is_none());

        store.delete("t1/abc/file.csv").await.unwrap();
        assert!(store.get("t1/abc/file.csv").await.unwrap().is_none());
        store.delete("t1/abc/file.csv").await.unwrap();
    }

    #[tokio::test]
    async fn test_fs_store_rejects_escaping_keys() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());
        assert!(store.put("../outside", b"x").await.is_err());
        assert!(store.put("/abs/path", b"x").await.is_err());
        assert!(store.get("").await.is_err());
    }
}
