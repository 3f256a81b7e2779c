//! Provider backed by a directory on the local disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use super::{normalize, ListEntry, Metadata, Provider, ProviderError, ProviderResult};

/// Stores files under `root`. Paths are relative to the root and use `/`.
#[derive(Debug, Clone)]
pub struct LocalProvider {
    root: PathBuf,
}

impl LocalProvider {
    /// Open a provider rooted at `root`, which must be an existing directory.
    pub fn new(root: impl AsRef<Path>) -> ProviderResult<Self> {
        let root = root.as_ref();
        let display = root.display().to_string();
        let meta = fs::metadata(root).map_err(|e| ProviderError::io(&display, e))?;
        if !meta.is_dir() {
            return Err(ProviderError::InvalidPath(display));
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> ProviderResult<PathBuf> {
        let mut full = self.root.clone();
        full.extend(normalize(path)?);
        Ok(full)
    }

    fn metadata_of(path: &str, meta: &fs::Metadata) -> ProviderResult<Metadata> {
        let modified = meta.modified().map_err(|e| ProviderError::io(path, e))?;
        let timestamp = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Ok(Metadata {
            size: meta.len(),
            timestamp,
        })
    }
}

impl Provider for LocalProvider {
    fn delete(&mut self, path: &str) -> ProviderResult<bool> {
        let full = self.resolve(path)?;
        if !full.is_file() {
            return Ok(false);
        }
        fs::remove_file(&full).map_err(|e| ProviderError::io(path, e))?;
        Ok(true)
    }

    fn get_metadata(&self, path: &str) -> ProviderResult<Metadata> {
        let full = self.resolve(path)?;
        let meta = fs::metadata(&full).map_err(|e| ProviderError::io(path, e))?;
        Self::metadata_of(path, &meta)
    }

    fn list_contents(&self, path: &str) -> ProviderResult<Vec<ListEntry>> {
        let segments = normalize(path)?;
        let full = self.resolve(path)?;
        let prefix = segments.join("/");

        let mut entries = Vec::new();
        for dirent in fs::read_dir(&full).map_err(|e| ProviderError::io(path, e))? {
            let dirent = dirent.map_err(|e| ProviderError::io(path, e))?;
            let name = dirent.file_name().to_string_lossy().into_owned();
            let rel = if prefix.is_empty() {
                name
            } else {
                format!("{prefix}/{name}")
            };

            let meta = dirent.metadata().map_err(|e| ProviderError::io(&rel, e))?;
            if meta.is_dir() {
                entries.push(ListEntry::dir(rel));
            } else {
                let file_meta = Self::metadata_of(&rel, &meta)?;
                entries.push(ListEntry::file(rel, file_meta));
            }
        }
        Ok(entries)
    }

    fn read(&self, path: &str) -> ProviderResult<Vec<u8>> {
        let full = self.resolve(path)?;
        fs::read(&full).map_err(|e| ProviderError::io(path, e))
    }

    fn write(&mut self, path: &str, contents: &[u8]) -> ProviderResult<bool> {
        if normalize(path)?.is_empty() {
            return Err(ProviderError::InvalidPath(path.to_string()));
        }
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| ProviderError::io(path, e))?;
        }
        fs::write(&full, contents).map_err(|e| ProviderError::io(path, e))?;
        Ok(true)
    }

    fn rename(&mut self, from: &str, to: &str) -> ProviderResult<bool> {
        let source = self.resolve(from)?;
        let target = self.resolve(to)?;
        if !source.exists() || target.exists() {
            return Ok(false);
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| ProviderError::io(to, e))?;
        }
        fs::rename(&source, &target).map_err(|e| ProviderError::io(from, e))?;
        Ok(true)
    }
}
