use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::traits::{CasOutcome, KeyedStore};

const ENTRY_SUFFIX: &str = ".json";

/// Directory-backed keyed store: one file per key.
///
/// File names are the hex encoding of the key, so any key maps to a safe,
/// reversible name. Writes go through a temp file in the same directory and
/// an atomic rename, so readers never observe a torn value.
///
/// Conditional writes are serialized by a mutex shared by every clone of the
/// store. Two processes writing the same directory are not coordinated.
#[derive(Clone)]
pub struct DirectoryStore {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl DirectoryStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        debug!(path = %root.display(), "opened directory store");
        Ok(Self {
            root,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(root: &Path, key: &str) -> StoreResult<PathBuf> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
                reason: "key must not be empty".into(),
            });
        }
        Ok(root.join(format!("{}{ENTRY_SUFFIX}", hex::encode(key.as_bytes()))))
    }

    fn key_from_file_name(name: &str) -> Option<String> {
        let stem = name.strip_suffix(ENTRY_SUFFIX)?;
        let bytes = hex::decode(stem).ok()?;
        String::from_utf8(bytes).ok()
    }

    fn read_entry(path: &Path) -> StoreResult<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_entry(root: &Path, path: &Path, value: &[u8]) -> StoreResult<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(root)?;
        tmp.write_all(value)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    fn lock(lock: &Mutex<()>) -> StoreResult<std::sync::MutexGuard<'_, ()>> {
        lock.lock()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))
    }

    /// Run blocking filesystem work off the async executor.
    async fn blocking<T, F>(&self, work: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Path, &Mutex<()>) -> StoreResult<T> + Send + 'static,
    {
        let root = self.root.clone();
        let lock = Arc::clone(&self.write_lock);
        tokio::task::spawn_blocking(move || work(&root, &lock))
            .await
            .map_err(|e| StoreError::Unavailable(format!("blocking task failed: {e}")))?
    }
}

#[async_trait]
impl KeyedStore for DirectoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let key = key.to_string();
        self.blocking(move |root, _| Self::read_entry(&Self::entry_path(root, &key)?))
            .await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        let key = key.to_string();
        self.blocking(move |root, lock| {
            let path = Self::entry_path(root, &key)?;
            let _guard = Self::lock(lock)?;
            Self::write_entry(root, &path, &value)
        })
        .await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let key = key.to_string();
        self.blocking(move |root, lock| {
            let path = Self::entry_path(root, &key)?;
            let _guard = Self::lock(lock)?;
            match fs::remove_file(&path) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let key = key.to_string();
        self.blocking(move |root, _| Ok(Self::entry_path(root, &key)?.is_file()))
            .await
    }

    async fn scan_all(&self) -> StoreResult<Vec<(String, Vec<u8>)>> {
        self.blocking(|root, _| {
            let mut entries = Vec::new();
            for dirent in fs::read_dir(root)? {
                let dirent = dirent?;
                let name = dirent.file_name();
                let Some(key) = name.to_str().and_then(Self::key_from_file_name) else {
                    continue;
                };
                // A concurrent delete may remove the file between listing and reading.
                if let Some(bytes) = Self::read_entry(&dirent.path())? {
                    entries.push((key, bytes));
                }
            }
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Ok(entries)
        })
        .await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: Vec<u8>,
    ) -> StoreResult<CasOutcome> {
        let key = key.to_string();
        let expected = expected.map(<[u8]>::to_vec);
        self.blocking(move |root, lock| {
            let path = Self::entry_path(root, &key)?;
            let _guard = Self::lock(lock)?;
            let current = Self::read_entry(&path)?;
            if current != expected {
                return Ok(CasOutcome::Mismatch);
            }
            Self::write_entry(root, &path, &value)?;
            Ok(CasOutcome::Applied)
        })
        .await
    }
}

impl std::fmt::Debug for DirectoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryStore")
            .field("root", &self.root)
            .finish()
    }
}
