//! In-memory provider.
//!
//! Stores are looked up by name in a process-wide registry, so every worker
//! running in the same process (thread mode) sees the same files. Worker
//! processes each get their own empty store.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use super::{normalize, ListEntry, Metadata, Provider, ProviderError, ProviderResult};

#[derive(Debug, Default)]
struct Store {
    files: BTreeMap<String, (Vec<u8>, i64)>,
}

type SharedStore = Arc<Mutex<Store>>;

fn registry() -> &'static Mutex<HashMap<String, SharedStore>> {
    static STORES: OnceLock<Mutex<HashMap<String, SharedStore>>> = OnceLock::new();
    STORES.get_or_init(Default::default)
}

/// A provider keeping whole files in memory.
#[derive(Debug, Clone)]
pub struct MemoryProvider {
    store: SharedStore,
}

impl MemoryProvider {
    /// Attach to the store called `name`, creating it if needed.
    pub fn named(name: &str) -> Self {
        let mut stores = registry().lock().unwrap_or_else(|e| e.into_inner());
        let store = stores.entry(name.to_string()).or_default().clone();
        Self { store }
    }

    /// Drop the store called `name` from the registry.
    pub fn forget(name: &str) {
        let mut stores = registry().lock().unwrap_or_else(|e| e.into_inner());
        stores.remove(name);
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn key(path: &str) -> ProviderResult<String> {
        let key = normalize(path)?.join("/");
        if key.is_empty() {
            return Err(ProviderError::InvalidPath(path.to_string()));
        }
        Ok(key)
    }
}

impl Provider for MemoryProvider {
    fn delete(&mut self, path: &str) -> ProviderResult<bool> {
        let key = Self::key(path)?;
        Ok(self.store().files.remove(&key).is_some())
    }

    fn get_metadata(&self, path: &str) -> ProviderResult<Metadata> {
        let key = Self::key(path)?;
        let store = self.store();
        let (contents, timestamp) = store
            .files
            .get(&key)
            .ok_or_else(|| ProviderError::NotFound(path.to_string()))?;
        Ok(Metadata {
            size: contents.len() as u64,
            timestamp: *timestamp,
        })
    }

    fn list_contents(&self, path: &str) -> ProviderResult<Vec<ListEntry>> {
        let prefix = normalize(path)?.join("/");
        let store = self.store();

        let mut entries = Vec::new();
        let mut dirs = BTreeSet::new();
        for (key, (contents, timestamp)) in &store.files {
            let rest = if prefix.is_empty() {
                key.as_str()
            } else {
                match key.strip_prefix(&prefix).and_then(|r| r.strip_prefix('/')) {
                    Some(rest) => rest,
                    None => continue,
                }
            };

            let full = |name: &str| {
                if prefix.is_empty() {
                    name.to_string()
                } else {
                    format!("{prefix}/{name}")
                }
            };

            match rest.split_once('/') {
                Some((dir, _)) => {
                    if dirs.insert(dir.to_string()) {
                        entries.push(ListEntry::dir(full(dir)));
                    }
                }
                None => entries.push(ListEntry::file(
                    full(rest),
                    Metadata {
                        size: contents.len() as u64,
                        timestamp: *timestamp,
                    },
                )),
            }
        }
        Ok(entries)
    }

    fn read(&self, path: &str) -> ProviderResult<Vec<u8>> {
        let key = Self::key(path)?;
        self.store()
            .files
            .get(&key)
            .map(|(contents, _)| contents.clone())
            .ok_or_else(|| ProviderError::NotFound(path.to_string()))
    }

    fn write(&mut self, path: &str, contents: &[u8]) -> ProviderResult<bool> {
        let key = Self::key(path)?;
        let now = chrono::Utc::now().timestamp();
        self.store().files.insert(key, (contents.to_vec(), now));
        Ok(true)
    }

    fn rename(&mut self, from: &str, to: &str) -> ProviderResult<bool> {
        let from = Self::key(from)?;
        let to = Self::key(to)?;
        let mut store = self.store();
        if store.files.contains_key(&to) {
            return Ok(false);
        }
        match store.files.remove(&from) {
            Some(file) => {
                store.files.insert(to, file);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
