//! Block content cache for one session
//!
//! Holds the last-known contents of blocks read through the session. A
//! block write drops only that block; a refresh drops everything.

use crate::core::geometry::Block;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;

/// Default capacity: every block of a 4K medium
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// LRU cache of block contents keyed by block index
pub struct SessionCache {
    blocks: LruCache<u32, Block>,
    hits: u64,
    misses: u64,
}

impl SessionCache {
    /// Create a cache holding up to `capacity` blocks (at least one)
    pub fn new(capacity: usize) -> Self {
        SessionCache {
            blocks: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
            hits: 0,
            misses: 0,
        }
    }

    /// Get a cached block, counting the hit or miss
    pub fn get(&mut self, index: u32) -> Option<Block> {
        match self.blocks.get(&index) {
            Some(block) => {
                self.hits += 1;
                Some(*block)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Store a block's contents
    pub fn insert(&mut self, index: u32, block: Block) {
        self.blocks.put(index, block);
    }

    /// Drop one block
    pub fn invalidate(&mut self, index: u32) {
        self.blocks.pop(&index);
    }

    /// Drop every block
    pub fn invalidate_all(&mut self) {
        self.blocks.clear();
    }

    /// Check for a block without touching recency or stats
    pub fn contains(&self, index: u32) -> bool {
        self.blocks.contains(&index)
    }

    /// Number of cached blocks
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.blocks.len(),
            capacity: self.blocks.cap().get(),
        }
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
