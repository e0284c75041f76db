// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bearer token storage and auth side-effect signalling.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::SyncError;

/// Broadcast when the backend rejects the stored credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// A 401 was received and the token cleared; the UI should route to login.
    SessionExpired { path: String },
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get(&self) -> Result<Option<String>, SyncError>;
    async fn set(&self, token: &str) -> Result<(), SyncError>;
    async fn clear(&self) -> Result<(), SyncError>;
}

/// Process-local token, lost on exit.
#[derive(Default)]
pub struct MemoryTokenStore {
    token: RwLock<Option<String>>,
}

impl MemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self { token: RwLock::new(Some(token.into())) }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self) -> Result<Option<String>, SyncError> {
        Ok(self.token.read().clone())
    }

    async fn set(&self, token: &str) -> Result<(), SyncError> {
        *self.token.write() = Some(token.to_string());
        Ok(())
    }

    async fn clear(&self) -> Result<(), SyncError> {
        self.token.write().take();
        Ok(())
    }
}

/// Token persisted in a small JSON object file under a storage key, so
/// several stores (or tools) can share one file.
pub struct FileTokenStore {
    path: PathBuf,
    key: String,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self { path: path.into(), key: key.into() }
    }

    async fn load(&self) -> Result<BTreeMap<String, String>, SyncError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                SyncError::Storage(format!("corrupt token file {}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(SyncError::Storage(format!("failed to read {}: {e}", self.path.display()))),
        }
    }

    async fn save(&self, entries: &BTreeMap<String, String>) -> Result<(), SyncError> {
        let bytes = serde_json::to_vec_pretty(entries).map_err(|e| SyncError::Storage(e.to_string()))?;
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|e| SyncError::Storage(format!("failed to write {}: {e}", self.path.display())))
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn get(&self) -> Result<Option<String>, SyncError> {
        Ok(self.load().await?.remove(&self.key))
    }

    async fn set(&self, token: &str) -> Result<(), SyncError> {
        let mut entries = self.load().await?;
        entries.insert(self.key.clone(), token.to_string());
        self.save(&entries).await
    }

    async fn clear(&self) -> Result<(), SyncError> {
        let mut entries = self.load().await?;
        if entries.remove(&self.key).is_some() {
            debug!(key = %self.key, "Clearing stored token");
            self.save(&entries).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryTokenStore::new();
        assert_eq!(store.get().await.unwrap(), None);

        store.set("abc").await.unwrap();
        assert_eq!(store.get().await.unwrap().as_deref(), Some("abc"));

        store.clear().await.unwrap();
        assert_eq!(store.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("tokens.json"), "authToken");
        assert_eq!(store.get().await.unwrap(), None);
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_keys_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let admin = FileTokenStore::new(&path, "adminToken");
        let user = FileTokenStore::new(&path, "userToken");

        admin.set("a-1").await.unwrap();
        user.set("u-1").await.unwrap();
        admin.clear().await.unwrap();

        assert_eq!(admin.get().await.unwrap(), None);
        assert_eq!(user.get().await.unwrap().as_deref(), Some("u-1"));
    }

    #[tokio::test]
    async fn test_file_store_corrupt_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, b"{not json").unwrap();

        let store = FileTokenStore::new(&path, "authToken");
        assert!(matches!(store.get().await, Err(SyncError::Storage(_))));
    }
}
