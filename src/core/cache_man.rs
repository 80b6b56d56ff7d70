//! Cache sizing policy, resident-memory accounting and the source epoch.
//!
//! The epoch is bumped whenever the cache switches to a new source. Decode
//! jobs carry the epoch they were scheduled under and are dropped if it no
//! longer matches.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};

const MEGABYTE: usize = 1024 * 1024;

/// Budget and pressure tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Decoded size up to which every frame is kept
    pub all_threshold_bytes: usize,
    /// Decoded size up to which `default_budget` frames are kept
    pub default_threshold_bytes: usize,
    pub default_budget: usize,
    /// Budget above `default_threshold_bytes` and while under memory pressure
    pub low_memory_budget: usize,
    /// Intermediate budget during regrowth after a pressure event
    pub grow_budget: usize,
    /// Pressure events after which regrowth is no longer attempted
    pub grow_attempts_max: u32,
    /// Delay between regrowth stages
    pub pressure_cooldown_ms: u64,
    /// Caller ceiling on resident frames, 0 = none
    pub budget_cap: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            all_threshold_bytes: 10 * MEGABYTE,
            default_threshold_bytes: 75 * MEGABYTE,
            default_budget: 5,
            low_memory_budget: 1,
            grow_budget: 2,
            grow_attempts_max: 2,
            pressure_cooldown_ms: 3000,
            budget_cap: 0,
        }
    }
}

impl CacheConfig {
    /// Resident frame count for an image of this size, computed once per source.
    pub fn optimal_budget(&self, bytes_per_frame: usize, frame_count: usize) -> usize {
        let total = bytes_per_frame.saturating_mul(frame_count);
        let budget = if total <= self.all_threshold_bytes {
            frame_count
        } else if total <= self.default_threshold_bytes {
            self.default_budget
        } else {
            self.low_memory_budget
        };
        let budget = budget.clamp(1, frame_count.max(1));
        debug!(
            "Optimal budget: {} of {} frames ({} MB decoded)",
            budget,
            frame_count,
            total / MEGABYTE
        );
        budget
    }
}

/// Resident-memory counter and source epoch, shared with the decode worker.
#[derive(Debug)]
pub struct CacheManager {
    memory_usage: AtomicUsize,
    current_epoch: Arc<AtomicU64>,
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheManager {
    pub fn new() -> Self {
        Self {
            memory_usage: AtomicUsize::new(0),
            current_epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Increment epoch and return new value
    ///
    /// Call this when the source changes to cancel all pending decode jobs.
    pub fn increment_epoch(&self) -> u64 {
        let new_epoch = self.current_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Source epoch incremented: {}", new_epoch);
        new_epoch
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch.load(Ordering::SeqCst)
    }

    /// Shared epoch counter (for Workers)
    pub fn epoch_ref(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.current_epoch)
    }

    /// Bytes held by resident frames
    pub fn mem(&self) -> usize {
        self.memory_usage.load(Ordering::Relaxed)
    }

    pub fn add_memory(&self, bytes: usize) {
        self.memory_usage.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Saturating, so a double free cannot wrap the counter
    pub fn free_memory(&self, bytes: usize) {
        let _ = self
            .memory_usage
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(bytes))
            });
    }
}
