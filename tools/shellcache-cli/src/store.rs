//! On-disk state between runs: the cache snapshot and the installed version.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use shellcache_common::ResultExt;
use shellcache_sw::CacheStorage;

const CACHES_FILE: &str = "caches.json";
const WORKER_FILE: &str = "worker.json";

/// Record of the last activated worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledWorker {
    pub cache_name: String,
    pub origin: String,
}

/// State directory.
#[derive(Debug, Clone)]
pub struct Store {
    dir: PathBuf,
}

impl Store {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<platform cache dir>/shellcache`.
    pub fn default_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shellcache")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn caches_path(&self) -> PathBuf {
        self.dir.join(CACHES_FILE)
    }

    pub fn load_caches(&self) -> shellcache_common::Result<CacheStorage> {
        CacheStorage::load(self.caches_path())
    }

    pub fn save_caches(&self, caches: &CacheStorage) -> shellcache_common::Result<()> {
        caches.save(self.caches_path())
    }

    pub fn installed(&self) -> shellcache_common::Result<Option<InstalledWorker>> {
        let path = self.dir.join(WORKER_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    pub fn record_installed(&self, worker: &InstalledWorker) -> shellcache_common::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.dir.join(WORKER_FILE), serde_json::to_vec_pretty(worker)?)?;
        Ok(())
    }

    /// Remove all state. Returns whether anything existed.
    pub fn purge(&self) -> shellcache_common::Result<bool> {
        if !self.dir.exists() {
            return Ok(false);
        }
        for name in [CACHES_FILE, WORKER_FILE] {
            let path = self.dir.join(name);
            if path.exists() {
                std::fs::remove_file(&path)
                    .context(format!("removing {}", path.display()))?;
            }
        }
        Ok(true)
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(Self::default_dir())
    }
}
