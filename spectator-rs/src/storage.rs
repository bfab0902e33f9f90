//! Durable per-viewer key/value storage.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::error::StorageError;

pub const SPECTATOR_ID_KEY: &str = "spectatorId";
pub const SPECTATOR_HASH_KEY: &str = "spectatorHash";

const STATE_FILE_NAME: &str = "spectator.json";

pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Lives as long as the process. Used when nothing durable is available.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// A JSON file of string values.
///
/// Values are cached in memory, and the cache is updated before the file is written, so a failed
/// write still leaves the value readable for the rest of the session.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl FileStore {
    pub fn open(directory: impl AsRef<Path>) -> Result<Self, StorageError> {
        let directory = directory.as_ref();
        std::fs::create_dir_all(directory)?;
        let path = directory.join(STATE_FILE_NAME);

        let values = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                log::warn!(
                    "Discarding unreadable spectator state in {}: {e}",
                    path.display()
                );
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.values.insert(key.to_string(), value.to_string());
        let bytes = serde_json::to_vec_pretty(&self.values)?;
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }
}

/// Open a [`FileStore`] in `directory`, falling back to a [`MemoryStore`] if that fails or no
/// directory is configured.
pub fn open_store(directory: Option<&Path>) -> Box<dyn KeyValueStore> {
    let Some(directory) = directory else {
        return Box::new(MemoryStore::default());
    };
    match FileStore::open(directory) {
        Ok(store) => Box::new(store),
        Err(e) => {
            log::warn!(
                "Can't use {} for spectator state, keeping it in memory: {e}",
                directory.display()
            );
            Box::new(MemoryStore::default())
        }
    }
}

/// Read the viewer's spectator id, generating and persisting one the first time.
pub fn get_or_create_spectator_id(store: &mut dyn KeyValueStore) -> String {
    if let Some(id) = store.get(SPECTATOR_ID_KEY).filter(|id| !id.is_empty()) {
        return id;
    }

    let id = uuid::Uuid::new_v4().to_string();
    if let Err(e) = store.set(SPECTATOR_ID_KEY, &id) {
        log::warn!("Failed to persist spectator id, it will only last this session: {e}");
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spectator_id_is_stable() {
        let mut store = MemoryStore::default();
        let first = get_or_create_spectator_id(&mut store);
        let second = get_or_create_spectator_id(&mut store);
        assert_eq!(first, second);
        assert_eq!(store.get(SPECTATOR_ID_KEY), Some(first));
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let id = {
            let mut store = FileStore::open(dir.path()).unwrap();
            get_or_create_spectator_id(&mut store)
        };

        let mut reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get(SPECTATOR_ID_KEY), Some(id.clone()));
        assert_eq!(get_or_create_spectator_id(&mut reopened), id);
    }

    #[test]
    fn test_corrupt_file_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STATE_FILE_NAME), b"{not json").unwrap();

        let mut store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.get(SPECTATOR_ID_KEY), None);
        store.set(SPECTATOR_HASH_KEY, "h").unwrap();
        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get(SPECTATOR_HASH_KEY), Some("h".to_string()));
    }

    #[test]
    fn test_failed_write_keeps_session_value() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();
        // A directory where the file should be makes every write fail.
        std::fs::create_dir(store.path()).unwrap();

        let id = get_or_create_spectator_id(&mut store);
        assert!(!id.is_empty());
        assert_eq!(get_or_create_spectator_id(&mut store), id);
    }

    #[test]
    fn test_open_store_falls_back_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"").unwrap();

        let mut store = open_store(Some(&blocker.join("nested")));
        store.set(SPECTATOR_ID_KEY, "x").unwrap();
        assert_eq!(store.get(SPECTATOR_ID_KEY), Some("x".to_string()));
    }
}
