// API key persistence
//
// The key lives behind an injected store so the session never touches
// ambient global state. The file store keeps a single fixed-name file.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

const KEY_FILE: &str = "api_key";

/// Key-value abstraction for the persisted API key.
pub trait KeyStore: Send + Sync {
    /// Currently stored key, if any.
    fn get(&self) -> Option<String>;
    /// Overwrite the stored key.
    fn set(&mut self, value: &str) -> std::io::Result<()>;
}

/// File-backed store under a fixed file name inside `dir`.
pub struct FileKeyStore {
    path: PathBuf,
}

impl FileKeyStore {
    pub fn new(dir: &Path) -> std::io::Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join(KEY_FILE),
        })
    }
}

impl KeyStore for FileKeyStore {
    fn get(&self) -> Option<String> {
        let content = fs::read_to_string(&self.path).ok()?;
        let trimmed = content.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    fn set(&mut self, value: &str) -> std::io::Result<()> {
        fs::write(&self.path, value)?;
        debug!("API key stored at {}", self.path.display());
        Ok(())
    }
}

/// In-memory store, used by tests and one-shot invocations.
#[derive(Default)]
pub struct MemoryKeyStore {
    value: Option<String>,
}

impl KeyStore for MemoryKeyStore {
    fn get(&self) -> Option<String> {
        self.value.clone()
    }

    fn set(&mut self, value: &str) -> std::io::Result<()> {
        self.value = Some(value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileKeyStore::new(dir.path()).unwrap();

        assert!(store.get().is_none());
        store.set("key-123").unwrap();
        assert_eq!(store.get().as_deref(), Some("key-123"));

        // A fresh store over the same directory reloads the key
        let reloaded = FileKeyStore::new(dir.path()).unwrap();
        assert_eq!(reloaded.get().as_deref(), Some("key-123"));
    }

    #[test]
    fn test_file_store_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileKeyStore::new(dir.path()).unwrap();
        store.set("first").unwrap();
        store.set("second").unwrap();
        assert_eq!(store.get().as_deref(), Some("second"));
    }

    #[test]
    fn test_file_store_blank_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileKeyStore::new(dir.path()).unwrap();
        store.set("   ").unwrap();
        assert!(store.get().is_none());
    }

    #[test]
    fn test_memory_store() {
        let mut store = MemoryKeyStore::default();
        assert!(store.get().is_none());
        store.set("k").unwrap();
        assert_eq!(store.get().as_deref(), Some("k"));
    }
}
