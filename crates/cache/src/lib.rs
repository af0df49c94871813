//! Shelf preview cache.
//!
//! Two-tier cache of encoded page previews: a byte-bounded memory tier in
//! front of an unbounded directory of image files.

pub mod config;
pub mod disk;
pub mod key;
pub mod memory;
mod preview;

pub use config::{CacheConfig, ConfigError, EvictionPolicy, PreviewFormat};
pub use disk::DiskTier;
pub use key::{sanitize_id, PreviewKey};
pub use memory::{CacheStats, MemoryTier};
pub use preview::{CacheError, PreviewCache, PreviewStats};
