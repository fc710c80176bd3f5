use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use url::Url;

use crate::cache_path::{key_for, mirror_dir, CacheKey, INDEX_FILE};
use crate::error::FilesystemError;

type FsResult<T> = Result<T, FilesystemError>;

/// One mirror directory under the cache root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheInfo {
    pub count: usize,
    pub total_size: u64,
    pub entries: Vec<CacheEntry>,
}

/// Filesystem-backed registry of mirrors, and the only writer of the cache tree.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: &Path) -> FsResult<Self> {
        let root = root.to_path_buf();
        fs::create_dir_all(&root).map_err(|e| FilesystemError::from_io(&root, e))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mirror_dir(&self, url: &Url) -> PathBuf {
        mirror_dir(&self.root, &key_for(url))
    }

    /// Creates the mirror directory for `key`. Asset subdirectories appear on first write.
    pub fn prepare(&self, key: &CacheKey) -> FsResult<PathBuf> {
        let dir = mirror_dir(&self.root, key);
        fs::create_dir_all(&dir).map_err(|e| FilesystemError::from_io(&dir, e))?;
        Ok(dir)
    }

    pub fn write_document(&self, key: &CacheKey, content: &[u8]) -> FsResult<PathBuf> {
        let path = mirror_dir(&self.root, key).join(INDEX_FILE);
        write_atomic(&path, content)?;
        Ok(path)
    }

    pub fn write_asset(&self, path: &Path, content: &[u8]) -> FsResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| FilesystemError::from_io(parent, e))?;
        }
        write_atomic(path, content)
    }

    pub fn asset_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// True iff the mirror for `url` has an `index.html`.
    pub fn exists(&self, url: &Url) -> bool {
        self.index_path(url).is_some()
    }

    /// Path of the offline document, if the page has been mirrored.
    pub fn index_path(&self, url: &Url) -> Option<PathBuf> {
        let path = self.mirror_dir(url).join(INDEX_FILE);
        path.is_file().then_some(path)
    }

    /// Total bytes stored for `url`, or 0 when it has no mirror.
    pub fn size_of(&self, url: &Url) -> FsResult<u64> {
        let dir = self.mirror_dir(url);
        if !dir.exists() {
            return Ok(0);
        }
        dir_size(&dir)
    }

    pub fn evict(&self, url: &Url) -> FsResult<()> {
        let dir = self.mirror_dir(url);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!("Evicted mirror {}", dir.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FilesystemError::from_io(&dir, e)),
        }
    }

    /// Deletes every mirror and recreates an empty cache root.
    pub fn evict_all(&self) -> FsResult<()> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(FilesystemError::from_io(&self.root, e)),
        }
        fs::create_dir_all(&self.root).map_err(|e| FilesystemError::from_io(&self.root, e))?;
        info!("Cleared cache root {}", self.root.display());
        Ok(())
    }

    pub fn list_entries(&self) -> FsResult<Vec<CacheEntry>> {
        let read = match fs::read_dir(&self.root) {
            Ok(read) => read,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(FilesystemError::from_io(&self.root, e)),
        };

        let mut entries = Vec::new();
        for entry in read {
            let entry = entry.map_err(|e| FilesystemError::from_io(&self.root, e))?;
            let path = entry.path();
            if path.is_dir() {
                let size = dir_size(&path)?;
                entries.push(CacheEntry { path, size });
            }
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    pub fn info(&self) -> FsResult<CacheInfo> {
        let entries = self.list_entries()?;
        Ok(CacheInfo {
            count: entries.len(),
            total_size: entries.iter().map(|e| e.size).sum(),
            entries,
        })
    }
}

/// Writes through a sibling `.part` file so readers never see a truncated file.
fn write_atomic(path: &Path, content: &[u8]) -> FsResult<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".part");
    let tmp_path = path.with_file_name(tmp_name);

    fs::write(&tmp_path, content).map_err(|e| FilesystemError::from_io(&tmp_path, e))?;

    #[cfg(target_os = "windows")]
    if path.exists() {
        fs::remove_file(path).map_err(|e| FilesystemError::from_io(path, e))?;
    }

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        FilesystemError::from_io(path, e)
    })?;

    debug!("Wrote {} bytes to {}", content.len(), path.display());
    Ok(())
}

fn dir_size(dir: &Path) -> FsResult<u64> {
    let mut total = 0;
    let read = fs::read_dir(dir).map_err(|e| FilesystemError::from_io(dir, e))?;
    for entry in read {
        let entry = entry.map_err(|e| FilesystemError::from_io(dir, e))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| FilesystemError::from_io(&path, e))?;
        if file_type.is_dir() {
            total += dir_size(&path)?;
        } else if file_type.is_file() {
            total += entry
                .metadata()
                .map_err(|e| FilesystemError::from_io(&path, e))?
                .len();
        }
    }
    Ok(total)
}
