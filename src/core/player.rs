//! Playback driver: tick-based frame timing with bounded looping
//!
//! **Architecture**: PlaybackDriver does NOT own the FrameCache. It receives
//! `&FrameCache` on every tick, so the host can share one cache between
//! several consumers and swap its source without touching the driver.
//!
//! # Timing Model
//!
//! Delay-based: each frame has its own duration from the image metadata.
//! `on_tick(elapsed)` adds wall time to an accumulator and advances as many
//! frames as it covers (a long tick catches up several frames at once).
//! Time only accumulates while the current frame is resident: on a cache
//! miss the last frame stays on screen and the clock holds.
//!
//! # Redraw
//!
//! Advancing marks a redraw as pending. It is flushed on the first tick that
//! presents the new current frame, never with a stale bitmap.
//!
//! # States
//!
//! - **Stopped**: paused or not attached to a surface
//! - **Playing**: attached and not paused
//! - **Finished**: loop count exhausted; `resume`, `attach`, `reset_loops` or a
//!   source switch restarts from frame 0

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, trace};

use crate::core::frame_cache::FrameCache;
use crate::entities::{AnimatedImage, Frame, RenderSurface};
use crate::error::CacheError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Stopped,
    Playing,
    Finished,
}

/// Playback state manager (does NOT own the cache)
#[derive(Debug)]
pub struct PlaybackDriver {
    image: Arc<AnimatedImage>,
    /// Cache epoch this state was built for
    generation: u64,
    current_index: usize,
    /// `None` = loop forever
    loops_remaining: Option<u32>,
    accumulated: Duration,
    displayed: Frame,
    displayed_index: Option<usize>,
    pending_redraw: bool,
    paused: bool,
    attached: bool,
    finished: bool,
}

impl PlaybackDriver {
    /// Driver positioned at frame 0 of the cache's current image, detached.
    pub fn new(cache: &FrameCache) -> Self {
        let image = cache.image();
        let driver = Self {
            generation: cache.generation(),
            current_index: 0,
            loops_remaining: image.loops(),
            accumulated: Duration::ZERO,
            displayed: image.poster().clone(),
            displayed_index: None,
            pending_redraw: true,
            paused: false,
            attached: false,
            finished: false,
            image,
        };
        info!(
            "PlaybackDriver initialized: {} frames, loops {:?}",
            driver.image.frame_count(),
            driver.loops_remaining
        );
        driver
    }

    pub fn status(&self) -> PlaybackStatus {
        if self.finished {
            PlaybackStatus::Finished
        } else if self.attached && !self.paused {
            PlaybackStatus::Playing
        } else {
            PlaybackStatus::Stopped
        }
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn loops_remaining(&self) -> Option<u32> {
        self.loops_remaining
    }

    pub fn accumulated(&self) -> Duration {
        self.accumulated
    }

    /// Last frame presented (the poster until the first tick)
    pub fn displayed(&self) -> &Frame {
        &self.displayed
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Advance playback by `elapsed`.
    ///
    /// Returns the new current index if it changed. A cache miss returns
    /// `Ok(None)` without consuming time.
    pub fn on_tick(
        &mut self,
        elapsed: Duration,
        cache: &FrameCache,
        surface: &mut dyn RenderSurface,
    ) -> Result<Option<usize>, CacheError> {
        if cache.generation() != self.generation {
            self.replace_source(cache);
        }
        if self.status() != PlaybackStatus::Playing {
            return Ok(None);
        }

        let Some(frame) = cache.request(self.current_index)? else {
            trace!("Frame {} not resident, holding", self.current_index);
            return Ok(None);
        };

        self.displayed = frame;
        if self.displayed_index != Some(self.current_index) {
            self.displayed_index = Some(self.current_index);
            self.pending_redraw = true;
        }
        if self.pending_redraw {
            surface.request_redraw(&self.displayed);
            self.pending_redraw = false;
        }

        let start = self.current_index;
        self.accumulated += elapsed;
        self.advance();

        Ok((self.current_index != start).then_some(self.current_index))
    }

    /// Consume whole frame delays from the accumulator.
    fn advance(&mut self) {
        let frame_count = self.image.frame_count();
        loop {
            let delay = self.image.delay(self.current_index);
            if self.accumulated < delay {
                break;
            }
            self.accumulated -= delay;
            self.pending_redraw = true;

            let next = self.current_index + 1;
            if next < frame_count {
                self.current_index = next;
                continue;
            }

            // Wrapped past the last frame
            if let Some(loops) = self.loops_remaining.as_mut() {
                *loops = loops.saturating_sub(1);
                if *loops == 0 {
                    debug!("Loop count exhausted, playback finished");
                    self.finished = true;
                    self.current_index = frame_count - 1;
                    self.accumulated = Duration::ZERO;
                    break;
                }
            }
            trace!("Frame loop: {} -> 0 (loops {:?})", self.current_index, self.loops_remaining);
            self.current_index = 0;
        }
    }

    /// Back to frame 0 with a fresh loop countdown.
    fn restart(&mut self) {
        self.current_index = 0;
        self.loops_remaining = self.image.loops();
        self.accumulated = Duration::ZERO;
        self.pending_redraw = true;
        self.finished = false;
    }

    /// Surface became visible
    pub fn attach(&mut self) {
        self.attached = true;
        if self.finished {
            self.restart();
        }
        trace!("Attached ({:?})", self.status());
    }

    /// Surface went away; playback stops, position is kept
    pub fn detach(&mut self) {
        self.attached = false;
        trace!("Detached at frame {}", self.current_index);
    }

    pub fn pause(&mut self) {
        self.set_paused(true);
    }

    /// Resume playback; from `Finished` this restarts the loop countdown.
    pub fn resume(&mut self) {
        self.set_paused(false);
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        if !paused && self.finished {
            self.restart();
        }
        trace!("Paused = {} ({:?})", paused, self.status());
    }

    /// Restore the loop countdown and leave `Finished`.
    pub fn reset_loops(&mut self) {
        if self.finished {
            self.restart();
        } else {
            self.loops_remaining = self.image.loops();
        }
    }

    /// Rebuild state for the cache's current source (index 0, poster shown).
    ///
    /// Called automatically on the first tick after `FrameCache::replace_source`.
    pub fn replace_source(&mut self, cache: &FrameCache) {
        self.image = cache.image();
        self.generation = cache.generation();
        self.displayed = self.image.poster().clone();
        self.displayed_index = None;
        self.restart();
        info!(
            "Playback reset for new source: {} frames, loops {:?}",
            self.image.frame_count(),
            self.loops_remaining
        );
    }
}
