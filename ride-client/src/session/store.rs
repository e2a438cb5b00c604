//! Persistent key-value storage for session secrets.
//!
//! The refresh token must survive restarts; the session kind is persisted
//! alongside it (it is not sensitive, but it lives here so cold-start
//! restoration has a single storage dependency). Saving `None` removes a
//! key; loading a missing key yields `Ok(None)`. Absence and removal are
//! distinct operations, not errors.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Storage key for the body-flow refresh token.
pub const REFRESH_TOKEN_KEY: &str = "auth.refresh_token";

/// Storage key for the persisted session kind.
pub const SESSION_KIND_KEY: &str = "auth.session_kind";

/// Storage failure. Callers treat these as soft: a failed save is logged,
/// a failed load behaves like an absent key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("token store error: {0}")]
pub struct StoreError(pub String);

/// Key-value store for session tokens.
pub trait TokenStore: Send + Sync + 'static {
    /// Set `key` to `value`, or remove it when `value` is `None`.
    fn save(
        &self,
        key: &str,
        value: Option<&str>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn load(&self, key: &str) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;
}

/// In-memory store, for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    values: RwLock<HashMap<String, String>>,
}

impl TokenStore for MemoryTokenStore {
    async fn save(&self, key: &str, value: Option<&str>) -> Result<(), StoreError> {
        let mut values = self.values.write().unwrap();
        match value {
            Some(v) => {
                values.insert(key.to_string(), v.to_string());
            }
            None => {
                values.remove(key);
            }
        }
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.read().unwrap().get(key).cloned())
    }
}

/// File-backed store: one JSON object per file.
///
/// This stands in for the platform's secure storage on targets that have
/// none. Writes rewrite the whole file; the single-writer access pattern
/// of the session layer makes that safe.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<HashMap<String, String>, StoreError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(StoreError(format!("read {}: {e}", self.path.display()))),
        };
        serde_json::from_str(&contents)
            .map_err(|e| StoreError(format!("parse {}: {e}", self.path.display())))
    }

    fn write_map(&self, map: &HashMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError(format!("create {}: {e}", parent.display())))?;
            }
        }
        let json = serde_json::to_string_pretty(map)
            .map_err(|e| StoreError(format!("serialize: {e}")))?;
        std::fs::write(&self.path, json)
            .map_err(|e| StoreError(format!("write {}: {e}", self.path.display())))
    }
}

impl TokenStore for FileTokenStore {
    async fn save(&self, key: &str, value: Option<&str>) -> Result<(), StoreError> {
        let mut map = self.read_map()?;
        match value {
            Some(v) => {
                map.insert(key.to_string(), v.to_string());
            }
            None => {
                map.remove(key);
            }
        }
        self.write_map(&map)
    }

    async fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_map()?.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn memory_store_save_load_remove() {
        let store = MemoryTokenStore::default();
        assert_eq!(store.load(REFRESH_TOKEN_KEY).await.unwrap(), None);

        store.save(REFRESH_TOKEN_KEY, Some("R")).await.unwrap();
        assert_eq!(
            store.load(REFRESH_TOKEN_KEY).await.unwrap(),
            Some("R".to_string())
        );

        store.save(REFRESH_TOKEN_KEY, None).await.unwrap();
        assert_eq!(store.load(REFRESH_TOKEN_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_store_persists_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let store = FileTokenStore::new(&path);
        store.save(REFRESH_TOKEN_KEY, Some("R")).await.unwrap();
        store.save(SESSION_KIND_KEY, Some("body")).await.unwrap();

        let reopened = FileTokenStore::new(&path);
        assert_eq!(
            reopened.load(REFRESH_TOKEN_KEY).await.unwrap(),
            Some("R".to_string())
        );
        assert_eq!(
            reopened.load(SESSION_KIND_KEY).await.unwrap(),
            Some("body".to_string())
        );
    }

    #[tokio::test]
    async fn file_store_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("nope.json"));
        assert_eq!(store.load(REFRESH_TOKEN_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_store_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("a").join("b").join("t.json"));
        store.save(REFRESH_TOKEN_KEY, Some("R")).await.unwrap();
        assert_eq!(
            store.load(REFRESH_TOKEN_KEY).await.unwrap(),
            Some("R".to_string())
        );
    }
}
