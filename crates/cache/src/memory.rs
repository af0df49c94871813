//! Memory tier of the preview cache.
//!
//! A byte-bounded map of encoded previews. When an insertion would exceed
//! the budget, entries are evicted from the front of the queue until usage
//! drops to the low watermark and the new entry fits.

use crate::config::EvictionPolicy;
use crate::key::PreviewKey;
use doc_model::DocumentId;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Statistics about memory tier usage.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    /// Number of previews currently held.
    pub entry_count: usize,
    /// Bytes held by those previews.
    pub memory_used: usize,
    /// Maximum bytes before eviction starts.
    pub memory_budget: usize,
    /// Lookups answered from memory.
    pub hits: u64,
    /// Lookups that fell through to disk.
    pub misses: u64,
    /// Entries dropped to stay within the budget.
    pub evictions: u64,
}

impl CacheStats {
    /// Hit rate of the memory tier (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Fraction of the budget in use (0.0 to 1.0).
    pub fn memory_utilization(&self) -> f64 {
        if self.memory_budget == 0 {
            0.0
        } else {
            self.memory_used as f64 / self.memory_budget as f64
        }
    }
}

struct TierState {
    entries: HashMap<PreviewKey, Arc<[u8]>>,
    /// Front is evicted first.
    queue: VecDeque<PreviewKey>,
    memory_used: usize,
    budget: usize,
    low_watermark: usize,
    policy: EvictionPolicy,
    stats: CacheStats,
}

impl TierState {
    fn new(budget: usize, low_watermark_ratio: f64, policy: EvictionPolicy) -> Self {
        Self {
            entries: HashMap::new(),
            queue: VecDeque::new(),
            memory_used: 0,
            budget,
            low_watermark: (budget as f64 * low_watermark_ratio.clamp(0.0, 1.0)) as usize,
            policy,
            stats: CacheStats { memory_budget: budget, ..Default::default() },
        }
    }

    fn touch(&mut self, key: &PreviewKey) {
        self.queue.retain(|k| k != key);
        self.queue.push_back(key.clone());
    }

    fn remove(&mut self, key: &PreviewKey) -> Option<Arc<[u8]>> {
        let bytes = self.entries.remove(key)?;
        self.memory_used = self.memory_used.saturating_sub(bytes.len());
        self.queue.retain(|k| k != key);
        Some(bytes)
    }

    fn evict_front(&mut self) -> bool {
        let Some(key) = self.queue.pop_front() else {
            return false;
        };

        if let Some(bytes) = self.entries.remove(&key) {
            self.memory_used = self.memory_used.saturating_sub(bytes.len());
            self.stats.evictions += 1;
            log::debug!("evicted preview {key} ({} bytes)", bytes.len());
        }
        true
    }

    /// Makes room for `incoming` bytes.
    fn evict_for(&mut self, incoming: usize) {
        if self.memory_used + incoming <= self.budget {
            return;
        }

        while self.memory_used + incoming > self.budget || self.memory_used > self.low_watermark
        {
            if !self.evict_front() {
                break;
            }
        }
    }

    fn sync_stats(&mut self) {
        self.stats.entry_count = self.entries.len();
        self.stats.memory_used = self.memory_used;
    }
}

/// Thread-safe in-memory tier.
///
/// A soft copy of the disk tier: anything evicted here can be read back
/// from disk.
pub struct MemoryTier {
    state: Mutex<TierState>,
}

impl MemoryTier {
    /// Creates an empty tier holding at most `budget` bytes.
    ///
    /// Eviction stops once usage is at `low_watermark_ratio` of the budget.
    pub fn new(budget: usize, low_watermark_ratio: f64, policy: EvictionPolicy) -> Self {
        Self { state: Mutex::new(TierState::new(budget, low_watermark_ratio, policy)) }
    }

    fn lock(&self) -> MutexGuard<'_, TierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores an entry, evicting older ones if needed.
    ///
    /// Returns `false` when the entry alone exceeds the budget and was not
    /// stored.
    pub fn put(&self, key: PreviewKey, bytes: Arc<[u8]>) -> bool {
        let mut state = self.lock();
        let size = bytes.len();

        state.remove(&key);

        if size > state.budget {
            log::debug!("preview {key} ({size} bytes) exceeds memory budget, disk only");
            state.sync_stats();
            return false;
        }

        state.evict_for(size);
        state.memory_used += size;
        state.queue.push_back(key.clone());
        state.entries.insert(key, bytes);
        state.sync_stats();
        true
    }

    /// Looks up an entry, counting a hit or a miss.
    ///
    /// Under [`EvictionPolicy::Lru`] a hit moves the entry to the back of
    /// the eviction queue.
    pub fn get(&self, key: &PreviewKey) -> Option<Arc<[u8]>> {
        let mut state = self.lock();

        match state.entries.get(key).cloned() {
            Some(bytes) => {
                if state.policy == EvictionPolicy::Lru {
                    state.touch(key);
                }
                state.stats.hits += 1;
                Some(bytes)
            }
            None => {
                state.stats.misses += 1;
                None
            }
        }
    }

    /// Membership check that leaves ordering and counters alone.
    pub fn contains(&self, key: &PreviewKey) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Drops every entry of one document. Returns how many were removed.
    pub fn remove_document(&self, document_id: &DocumentId) -> usize {
        let mut state = self.lock();
        let keys: Vec<PreviewKey> =
            state.entries.keys().filter(|key| key.document_id() == document_id).cloned().collect();

        for key in &keys {
            state.remove(key);
        }
        state.sync_stats();
        keys.len()
    }

    /// Drops every entry. Counters are kept.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.queue.clear();
        state.memory_used = 0;
        state.sync_stats();
    }

    /// Snapshot of the current counters.
    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }

    /// Bytes currently held.
    pub fn memory_used(&self) -> usize {
        self.lock().memory_used
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns true if no entries are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
