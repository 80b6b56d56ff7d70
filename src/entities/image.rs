//! Animated image metadata: frame count, loop count, per-frame delays and
//! the poster frame.
//!
//! Immutable once built. The cache and the driver share it through `Arc`.

use std::time::Duration;

use log::{debug, warn};

use super::frame::Frame;
use super::traits::FrameSource;
use crate::error::CacheError;

/// Delays below this are treated as unintentional (browser behavior)
pub const DELAY_MIN: Duration = Duration::from_millis(20);
/// Replacement for delays below `DELAY_MIN`
pub const DELAY_DEFAULT: Duration = Duration::from_millis(100);

/// Clamp an authored frame delay. Anything below `DELAY_MIN` becomes `DELAY_DEFAULT`.
pub fn clamp_delay(delay: Duration) -> Duration {
    if delay < DELAY_MIN {
        DELAY_DEFAULT
    } else {
        delay
    }
}

#[derive(Debug, Clone)]
pub struct AnimatedImage {
    width: u32,
    height: u32,
    /// 0 = loop forever
    loop_count: u32,
    delays: Vec<Duration>,
    poster_index: usize,
    poster: Frame,
}

impl AnimatedImage {
    /// Build from already-parsed metadata.
    ///
    /// `delays.len()` is the frame count. Delays are clamped here.
    pub fn new(
        loop_count: u32,
        delays: Vec<Duration>,
        poster_index: usize,
        poster: Frame,
    ) -> Result<Self, CacheError> {
        if delays.is_empty() {
            return Err(CacheError::InvalidSource("image has no frames".into()));
        }
        if poster_index >= delays.len() {
            return Err(CacheError::InvalidSource(format!(
                "poster index {} out of range ({} frames)",
                poster_index,
                delays.len()
            )));
        }
        let delays = delays.into_iter().map(clamp_delay).collect();
        Ok(Self {
            width: poster.width(),
            height: poster.height(),
            loop_count,
            delays,
            poster_index,
            poster,
        })
    }

    /// Build by probing `source` for the first frame that decodes.
    ///
    /// Frames that fail before the poster are skipped with a warning; if none
    /// decodes, the source is invalid.
    pub fn probe(
        source: &dyn FrameSource,
        loop_count: u32,
        delays: Vec<Duration>,
    ) -> Result<Self, CacheError> {
        for index in 0..delays.len() {
            match source.decode(index) {
                Ok(poster) => {
                    debug!("Poster frame: {} ({}x{})", index, poster.width(), poster.height());
                    return Self::new(loop_count, delays, index, poster);
                }
                Err(e) => warn!("Frame {} failed while probing for poster: {}", index, e),
            }
        }
        Err(CacheError::InvalidSource("no frame could be decoded".into()))
    }

    pub fn frame_count(&self) -> usize {
        self.delays.len()
    }

    pub fn loop_count(&self) -> u32 {
        self.loop_count
    }

    /// Loop countdown start value; `None` means infinite
    pub fn loops(&self) -> Option<u32> {
        (self.loop_count > 0).then_some(self.loop_count)
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Delay of frame `index`. Panics if out of range.
    pub fn delay(&self, index: usize) -> Duration {
        self.delays[index]
    }

    /// Total duration of one loop
    pub fn duration(&self) -> Duration {
        self.delays.iter().sum()
    }

    pub fn poster_index(&self) -> usize {
        self.poster_index
    }

    pub fn poster(&self) -> &Frame {
        &self.poster
    }

    /// Decoded size of one frame (RGBA8)
    pub fn bytes_per_frame(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}
