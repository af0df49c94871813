use crate::config::{CacheConfig, PreviewFormat};
use crate::disk::DiskTier;
use crate::key::PreviewKey;
use crate::memory::{CacheStats, MemoryTier};
use doc_model::DocumentId;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("preview {0} not cached")]
    NotFound(PreviewKey),
    #[error("preview cache I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Counters for both tiers.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PreviewStats {
    pub memory: CacheStats,
    /// Lookups served from disk after a memory miss.
    pub disk_hits: u64,
    /// Lookups absent from both tiers.
    pub misses: u64,
}

impl PreviewStats {
    /// Share of lookups served by either tier.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.memory.hits + self.disk_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Two-tier preview cache.
///
/// Reads check memory, then disk, promoting disk hits into memory. Writes go
/// to disk first and then to memory.
///
/// # Example
///
/// ```no_run
/// use doc_model::DocumentId;
/// use shelf_cache::{CacheConfig, PreviewCache};
///
/// let cache = PreviewCache::new(&CacheConfig::default()).unwrap();
/// let id = DocumentId::from("doc");
///
/// cache.put(&id, 1, 0.2, b"...".to_vec()).unwrap();
/// assert!(cache.has(&id, 1, 0.2));
/// ```
pub struct PreviewCache {
    memory: MemoryTier,
    disk: DiskTier,
    disk_hits: AtomicU64,
    misses: AtomicU64,
}

impl PreviewCache {
    pub fn new(config: &CacheConfig) -> Result<Self, CacheError> {
        let disk = DiskTier::new(&config.thumbnail_dir, config.format)?;
        let memory = MemoryTier::new(config.memory_budget, config.low_watermark, config.eviction);

        log::debug!(
            "preview cache at {} ({} MB, {:?})",
            config.thumbnail_dir.display(),
            config.memory_mb(),
            config.eviction
        );

        Ok(Self { memory, disk, disk_hits: AtomicU64::new(0), misses: AtomicU64::new(0) })
    }

    pub fn dir(&self) -> &Path {
        self.disk.dir()
    }

    pub fn format(&self) -> PreviewFormat {
        self.disk.format()
    }

    pub fn has(&self, id: &DocumentId, page: u32, scale: f32) -> bool {
        let key = PreviewKey::new(id.clone(), page, scale);
        self.memory.contains(&key) || self.disk.contains(&key)
    }

    pub fn get(&self, id: &DocumentId, page: u32, scale: f32) -> Result<Vec<u8>, CacheError> {
        let key = PreviewKey::new(id.clone(), page, scale);

        if let Some(bytes) = self.memory.get(&key) {
            log::debug!("preview memory hit {key}");
            return Ok(bytes.to_vec());
        }

        match self.disk.read(&key)? {
            Some(bytes) => {
                log::debug!("preview disk hit {key}");
                self.disk_hits.fetch_add(1, Ordering::Relaxed);
                self.memory.put(key, Arc::from(bytes.as_slice()));
                Ok(bytes)
            }
            None => {
                log::debug!("preview miss {key}");
                self.misses.fetch_add(1, Ordering::Relaxed);
                Err(CacheError::NotFound(key))
            }
        }
    }

    /// Writes through to disk, then stores in memory.
    ///
    /// A key already on disk keeps its first bytes; the call is then a
    /// no-op. A failed disk write is returned and leaves the memory tier
    /// untouched.
    pub fn put(
        &self,
        id: &DocumentId,
        page: u32,
        scale: f32,
        bytes: Vec<u8>,
    ) -> Result<(), CacheError> {
        let key = PreviewKey::new(id.clone(), page, scale);
        if self.disk.contains(&key) {
            log::debug!("preview {key} already cached");
            return Ok(());
        }
        self.disk.write(&key, &bytes)?;
        self.memory.put(key, Arc::from(bytes));
        Ok(())
    }

    /// Removes every cached preview of a document from both tiers.
    pub fn clear_for_document(&self, id: &DocumentId) -> Result<usize, CacheError> {
        let in_memory = self.memory.remove_document(id);
        let on_disk = self.disk.remove_document(id)?;
        log::debug!("cleared previews for {id}: {in_memory} in memory, {on_disk} on disk");
        Ok(on_disk)
    }

    /// Empties the memory tier. Disk files stay.
    pub fn clear_memory(&self) {
        self.memory.clear();
    }

    pub fn stats(&self) -> PreviewStats {
        PreviewStats {
            memory: self.memory.stats(),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
