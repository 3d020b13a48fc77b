//! Blob storage contract and implementations.
//!
//! Archive blobs are immutable: `put` is write-once in spirit, but an
//! overwrite with identical intent (a replayed task re-uploading the
//! processed XML) must be tolerated as an idempotent no-op, so neither
//! implementation refuses overwrites.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("blob store error: {0}")]
    Transient(String),
}

/// Get/put access to the archive.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, uri: &str) -> Result<Vec<u8>, BlobError>;
    async fn put(&self, uri: &str, bytes: &[u8]) -> Result<(), BlobError>;
}

/// Filesystem-backed store; URIs are paths relative to the root.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Reject URIs that would escape the root.
    fn resolve(&self, uri: &str) -> Result<PathBuf, BlobError> {
        if uri.split('/').any(|seg| seg == "..") || uri.starts_with('/') {
            return Err(BlobError::NotFound(uri.to_string()));
        }
        Ok(self.root.join(uri))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, uri: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.resolve(uri)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(uri.to_string()))
            }
            Err(e) => Err(BlobError::Transient(e.to_string())),
        }
    }

    async fn put(&self, uri: &str, bytes: &[u8]) -> Result<(), BlobError> {
        let path = self.resolve(uri)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BlobError::Transient(e.to_string()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| BlobError::Transient(e.to_string()))
    }
}

/// In-memory store for tests and local development.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, uri: &str, bytes: Vec<u8>) {
        self.blobs.lock().unwrap().insert(uri.to_string(), bytes);
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.blobs.lock().unwrap().contains_key(uri)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, uri: &str) -> Result<Vec<u8>, BlobError> {
        self.blobs
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(uri.to_string()))
    }

    async fn put(&self, uri: &str, bytes: &[u8]) -> Result<(), BlobError> {
        self.blobs
            .lock()
            .unwrap()
            .insert(uri.to_string(), bytes.to_vec());
        Ok(())
    }
}
