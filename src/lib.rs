//! animplay - animated image playback with an adaptive frame cache
//!
//! Re-exports all modules for use by the binary target.

// Core engine (cache, player, workers, pressure)
pub mod core;

// Data model and collaborator traits
pub mod entities;
pub mod error;

// App modules
pub mod cli;
pub mod config;
pub mod runner;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use crate::core::cache_man::CacheConfig;
pub use crate::core::frame_cache::{CacheStatsSnapshot, FrameCache};
pub use crate::core::player::{PlaybackDriver, PlaybackStatus};
pub use entities::{AnimatedImage, Frame, FrameSource, RenderSurface};
pub use error::CacheError;
