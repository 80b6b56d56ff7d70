//! Core engine modules - cache, player, workers, memory pressure
//!
//! These modules form the playback engine, independent of any display.

pub mod cache_events;
pub mod cache_man;
pub mod frame_cache;
pub mod player;
pub mod pressure;
pub mod timer;
pub mod workers;

// Re-exports for convenience
pub use cache_events::CacheEvent;
pub use cache_man::{CacheConfig, CacheManager};
pub use frame_cache::{CacheStats, CacheStatsSnapshot, FrameCache};
pub use player::{PlaybackDriver, PlaybackStatus};
pub use pressure::{ManualPressureMonitor, SystemPressureMonitor};
pub use timer::DeferredTimer;
pub use workers::Workers;
