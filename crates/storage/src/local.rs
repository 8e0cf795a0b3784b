//! Durable local storage.
//!
//! Stores one file per key in a directory. The file name is the
//! percent-encoded key plus `.json`; the contents are the encoded value.
//! Nothing expires.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use async_trait::async_trait;
use clipdo_core::{codec, BackendKind, PreservedKeys, StorageConfig, StoredValue};
use tokio::fs;
use tracing::debug;
use super::{Backend, Result};

const EXTENSION: &str = ".json";

/// File-backed local key/value storage.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create storage rooted at `root`, creating the directory if needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Create storage at the configured local directory.
    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        Self::new(config.local_dir()).await
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}{}", codec::encode_component(key), EXTENSION))
    }

    async fn read_raw(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.key_path(key)).await {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn get(&self, key: &str) -> Result<Option<StoredValue>> {
        let raw = self.read_raw(key).await?;
        Ok(raw.as_deref().and_then(codec::decode))
    }

    async fn set(&self, key: &str, value: &StoredValue) -> Result<()> {
        debug!("local set {}", key);
        fs::write(self.key_path(key), codec::encode(value).as_bytes()).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        debug!("local remove {}", key);
        fs::remove_file(self.key_path(key)).await.or_else(|e| {
            if e.kind() == std::io::ErrorKind::NotFound { Ok(()) } else { Err(e) }
        })?;
        Ok(())
    }

    async fn list_all(&self) -> Result<BTreeMap<String, String>> {
        let mut items = BTreeMap::new();
        let mut rd = fs::read_dir(&self.root).await?;
        while let Some(entry) = rd.next_entry().await? {
            let file_name = entry.file_name();
            let Some(stem) = file_name.to_str().and_then(|n| n.strip_suffix(EXTENSION)) else {
                continue;
            };
            let key = codec::decode_component(stem);
            if let Some(raw) = self.read_raw(&key).await? {
                items.insert(key, raw);
            }
        }
        Ok(items)
    }

    async fn clear(&self, except: &PreservedKeys) -> Result<()> {
        let keys = self.list_all().await?;
        let mut removed = 0usize;
        for key in keys.keys().filter(|k| !except.contains(k)) {
            self.remove(key).await?;
            removed += 1;
        }
        debug!("local clear removed {} key(s)", removed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipdo_core::{STORAGE_PREFERENCE_KEY, THEME_MODE_KEY};
    use serde_json::json;

    async fn storage() -> (tempfile::TempDir, LocalBackend) {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalBackend::new(dir.path().join("local")).await.unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn test_missing_key_is_absent() {
        let (_dir, storage) = storage().await;
        assert_eq!(storage.get("todos").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_get_remove() {
        let (_dir, storage) = storage().await;
        let todos = json!([{"id": 1, "text": "buy milk", "priority": "high"}]);

        storage.set("todos", &todos).await.unwrap();
        assert_eq!(storage.get("todos").await.unwrap(), Some(todos));

        storage.remove("todos").await.unwrap();
        assert_eq!(storage.get("todos").await.unwrap(), None);
        // Removing again is fine.
        storage.remove("todos").await.unwrap();
    }

    #[tokio::test]
    async fn test_awkward_keys() {
        let (_dir, storage) = storage().await;
        for key in ["a/b", "with space", "dots.json", "ü"] {
            storage.set(key, &json!(key)).await.unwrap();
        }
        let all = storage.list_all().await.unwrap();
        assert_eq!(all.len(), 4);
        for key in ["a/b", "with space", "dots.json", "ü"] {
            assert_eq!(storage.get(key).await.unwrap(), Some(json!(key)));
            assert_eq!(all[key], format!("\"{}\"", key));
        }
    }

    #[tokio::test]
    async fn test_corrupt_file_reads_as_absent() {
        let (dir, storage) = storage().await;
        std::fs::write(dir.path().join("local").join("broken.json"), "{nope").unwrap();
        assert_eq!(storage.get("broken").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_keeps_preserved() {
        let (_dir, storage) = storage().await;
        storage.set("todos", &json!([1, 2])).await.unwrap();
        storage.set("clipboard", &json!(["copied"])).await.unwrap();
        storage.set(STORAGE_PREFERENCE_KEY, &json!("local")).await.unwrap();
        storage.set(THEME_MODE_KEY, &json!("dark")).await.unwrap();

        storage.clear(&PreservedKeys::default()).await.unwrap();

        assert_eq!(storage.get("todos").await.unwrap(), None);
        assert_eq!(storage.get("clipboard").await.unwrap(), None);
        assert_eq!(storage.get(STORAGE_PREFERENCE_KEY).await.unwrap(), Some(json!("local")));
        assert_eq!(storage.get(THEME_MODE_KEY).await.unwrap(), Some(json!("dark")));
    }
}
