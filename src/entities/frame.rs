//! Decoded bitmap shared between the cache, the decode worker and the renderer.
//!
//! Frames are immutable after construction and cheap to clone (`Arc` inside),
//! so a frame can sit in the cache while the playback driver keeps showing it
//! after eviction.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Pixel layout of a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Straight (non-premultiplied) RGBA, 8 bits per channel
    Rgba8,
    /// Premultiplied RGBA, 8 bits per channel (cheapest to composite)
    Rgba8Premultiplied,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        4
    }
}

/// Frame-level failures (construction and decoding)
#[derive(Debug, Clone, Error)]
pub enum FrameError {
    #[error("decode error: {0}")]
    Decode(String),
    #[error("frame {index} is beyond the end of the stream")]
    MissingFrame { index: usize },
    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSize { expected: usize, actual: usize },
}

struct FrameData {
    width: u32,
    height: u32,
    format: PixelFormat,
    pixels: Vec<u8>,
}

/// Immutable decoded bitmap.
#[derive(Clone)]
pub struct Frame {
    data: Arc<FrameData>,
}

impl Frame {
    /// Wrap an RGBA8 buffer. Fails if the buffer length does not match the size.
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, FrameError> {
        Self::with_format(width, height, PixelFormat::Rgba8, pixels)
    }

    pub fn with_format(
        width: u32,
        height: u32,
        format: PixelFormat,
        pixels: Vec<u8>,
    ) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if pixels.len() != expected {
            return Err(FrameError::BufferSize {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            data: Arc::new(FrameData {
                width,
                height,
                format,
                pixels,
            }),
        })
    }

    /// Frame filled with a single RGBA color
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let mut pixels = vec![0u8; width as usize * height as usize * 4];
        for px in pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
        Self {
            data: Arc::new(FrameData {
                width,
                height,
                format: PixelFormat::Rgba8,
                pixels,
            }),
        }
    }

    pub fn width(&self) -> u32 {
        self.data.width
    }

    pub fn height(&self) -> u32 {
        self.data.height
    }

    pub fn format(&self) -> PixelFormat {
        self.data.format
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data.pixels
    }

    /// Size of the pixel buffer in bytes
    pub fn mem(&self) -> usize {
        self.data.pixels.len()
    }

    /// True if both handles point at the same bitmap
    pub fn ptr_eq(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Predraw step: convert to premultiplied alpha.
    ///
    /// Already-premultiplied frames are returned as-is (same allocation).
    pub fn premultiplied(&self) -> Frame {
        if self.data.format == PixelFormat::Rgba8Premultiplied {
            return self.clone();
        }
        let mut pixels = self.data.pixels.clone();
        for px in pixels.chunks_exact_mut(4) {
            let a = px[3] as u16;
            if a == 255 {
                continue;
            }
            for c in &mut px[..3] {
                // Rounded (c * a) / 255
                *c = ((*c as u16 * a + 127) / 255) as u8;
            }
        }
        Frame {
            data: Arc::new(FrameData {
                width: self.data.width,
                height: self.data.height,
                format: PixelFormat::Rgba8Premultiplied,
                pixels,
            }),
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.data.width)
            .field("height", &self.data.height)
            .field("format", &self.data.format)
            .field("bytes", &self.data.pixels.len())
            .finish()
    }
}
