//! Frame sources: GIF decoding via the `gif` crate and a generated source
//! for demos.
//!
//! GIF frames are composited on top of their predecessors, so `GifSource`
//! keeps one sequential decoder and its canvas between calls. Requests at or
//! past the cursor continue forward; a request behind it rewinds the stream.

use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use gif::{DisposalMethod, Repeat};
use image::{imageops, RgbaImage};
use log::{info, trace, warn};

use super::frame::{Frame, FrameError};
use super::image::AnimatedImage;
use super::traits::FrameSource;
use crate::error::CacheError;

const GIF_SIGNATURES: [&[u8]; 2] = [b"GIF87a", b"GIF89a"];

/// Screen area touched by one GIF frame
#[derive(Debug, Clone, Copy)]
struct Rect {
    left: u32,
    top: u32,
    width: u32,
    height: u32,
}

/// Sequential GIF reader plus the canvas its frames are painted onto
struct GifCanvas {
    reader: gif::Decoder<Cursor<Arc<[u8]>>>,
    canvas: RgbaImage,
    /// Snapshot restored after a frame disposed to "previous"
    saved: Option<RgbaImage>,
    /// Disposal owed by the last painted frame
    pending: Option<(DisposalMethod, Rect)>,
    /// Index of the frame the next `advance` paints
    next_index: usize,
}

impl GifCanvas {
    fn new(data: Arc<[u8]>) -> Result<Self, FrameError> {
        let mut options = gif::DecodeOptions::new();
        options.set_color_output(gif::ColorOutput::RGBA);
        let reader = options
            .read_info(Cursor::new(data))
            .map_err(|e| FrameError::Decode(e.to_string()))?;
        let canvas = RgbaImage::new(u32::from(reader.width()), u32::from(reader.height()));
        Ok(Self {
            reader,
            canvas,
            saved: None,
            pending: None,
            next_index: 0,
        })
    }

    /// Paint the next frame. Returns its delay, or `None` at the trailer.
    fn advance(&mut self) -> Result<Option<Duration>, FrameError> {
        let Some(frame) = self
            .reader
            .read_next_frame()
            .map_err(|e| FrameError::Decode(e.to_string()))?
        else {
            return Ok(None);
        };
        let rect = Rect {
            left: u32::from(frame.left),
            top: u32::from(frame.top),
            width: u32::from(frame.width),
            height: u32::from(frame.height),
        };
        let dispose = frame.dispose;
        let delay = Duration::from_millis(u64::from(frame.delay) * 10);
        let actual = frame.buffer.len();
        let patch = RgbaImage::from_raw(rect.width, rect.height, frame.buffer.to_vec()).ok_or(
            FrameError::BufferSize {
                expected: rect.width as usize * rect.height as usize * 4,
                actual,
            },
        )?;

        match self.pending.take() {
            Some((DisposalMethod::Background, area)) => {
                let clear = RgbaImage::new(area.width, area.height);
                imageops::replace(&mut self.canvas, &clear, i64::from(area.left), i64::from(area.top));
            }
            Some((DisposalMethod::Previous, _)) => {
                if let Some(saved) = self.saved.take() {
                    self.canvas = saved;
                }
            }
            _ => {}
        }
        if dispose == DisposalMethod::Previous {
            self.saved = Some(self.canvas.clone());
        }
        imageops::overlay(&mut self.canvas, &patch, i64::from(rect.left), i64::from(rect.top));

        self.pending = Some((dispose, rect));
        self.next_index += 1;
        Ok(Some(delay))
    }

    /// Paint forward until frame `index` is on the canvas
    fn seek(&mut self, index: usize) -> Result<Frame, FrameError> {
        while self.next_index <= index {
            if self.advance()?.is_none() {
                return Err(FrameError::MissingFrame { index });
            }
        }
        Frame::from_rgba(self.canvas.width(), self.canvas.height(), self.canvas.as_raw().clone())
    }

    fn repeat(&self) -> Repeat {
        self.reader.repeat()
    }
}

/// Loop count from the NETSCAPE2.0 extension.
///
/// Absent extension → 1 (play once). A stored value of 0 means forever.
fn loop_count_of(repeat: Repeat) -> u32 {
    match repeat {
        Repeat::Infinite => 0,
        Repeat::Finite(0) => 1,
        Repeat::Finite(n) => u32::from(n),
    }
}

/// Encoded GIF payload with a resumable decode cursor
pub struct GifSource {
    data: Arc<[u8]>,
    cursor: Mutex<Option<GifCanvas>>,
    restarts: AtomicUsize,
}

impl GifSource {
    /// Parse metadata and pick the poster.
    ///
    /// Walks the whole frame stream once to collect delays. GIF frames are
    /// one LZW stream, so nothing after a corrupt frame can be trusted: a
    /// stream error truncates the animation at the last good frame. The
    /// poster is the first frame that decodes; frames skipped on the way are
    /// logged.
    pub fn open(data: impl Into<Arc<[u8]>>) -> Result<(AnimatedImage, Arc<GifSource>), CacheError> {
        let data: Arc<[u8]> = data.into();
        if !GIF_SIGNATURES.iter().any(|sig| data.starts_with(sig)) {
            return Err(CacheError::InvalidSource("not a GIF".into()));
        }
        let invalid = |e: FrameError| CacheError::InvalidSource(e.to_string());

        let start = Instant::now();
        let mut scan = GifCanvas::new(Arc::clone(&data)).map_err(invalid)?;
        let mut delays = Vec::new();
        loop {
            match scan.advance() {
                Ok(Some(delay)) => delays.push(delay),
                Ok(None) => break,
                Err(e) => {
                    warn!("GIF stream error after {} frames, truncating: {}", delays.len(), e);
                    break;
                }
            }
        }
        if delays.is_empty() {
            return Err(CacheError::InvalidSource("GIF has no frames".into()));
        }
        let loop_count = loop_count_of(scan.repeat());

        let source = Arc::new(GifSource {
            data,
            cursor: Mutex::new(None),
            restarts: AtomicUsize::new(0),
        });
        let image = AnimatedImage::probe(&*source, loop_count, delays)?;

        info!(
            "GIF opened: {} frames, {}x{}, loop_count={}, poster={}, scanned in {:.1}ms",
            image.frame_count(),
            image.size().0,
            image.size().1,
            image.loop_count(),
            image.poster_index(),
            start.elapsed().as_secs_f64() * 1000.0
        );

        Ok((image, source))
    }

    /// Read a GIF file from disk
    pub fn open_path(path: &Path) -> Result<(AnimatedImage, Arc<GifSource>), CacheError> {
        let bytes = std::fs::read(path)
            .map_err(|e| CacheError::InvalidSource(format!("{}: {}", path.display(), e)))?;
        Self::open(bytes)
    }

    /// How many times the decode cursor was (re)started from frame 0
    pub fn stream_restarts(&self) -> usize {
        self.restarts.load(Ordering::Relaxed)
    }
}

impl FrameSource for GifSource {
    fn decode(&self, index: usize) -> Result<Frame, FrameError> {
        let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        if cursor.as_ref().is_none_or(|c| c.next_index > index) {
            trace!("GIF cursor restart for frame {}", index);
            self.restarts.fetch_add(1, Ordering::Relaxed);
            *cursor = Some(GifCanvas::new(Arc::clone(&self.data))?);
        }
        let Some(canvas) = cursor.as_mut() else {
            return Err(FrameError::Decode("GIF cursor unavailable".into()));
        };
        match canvas.seek(index) {
            Ok(frame) => Ok(frame.premultiplied()),
            Err(e) => {
                // A failed stream cannot be resumed
                *cursor = None;
                Err(e)
            }
        }
    }
}

/// Generated color-cycle frames, optionally with an artificial decode cost.
pub struct SyntheticSource {
    frame_count: usize,
    width: u32,
    height: u32,
    latency: Duration,
}

impl SyntheticSource {
    pub fn new(frame_count: usize, width: u32, height: u32) -> Self {
        Self {
            frame_count,
            width,
            height,
            latency: Duration::ZERO,
        }
    }

    /// Sleep this long inside every decode
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Metadata with uniform delays
    pub fn open(self, loop_count: u32, delay: Duration) -> Result<(AnimatedImage, Arc<SyntheticSource>), CacheError> {
        let delays = vec![delay; self.frame_count];
        let image = AnimatedImage::probe(&self, loop_count, delays)?;
        Ok((image, Arc::new(self)))
    }

    fn color(&self, index: usize) -> [u8; 4] {
        // Hue walk around the RGB cube
        let t = (index * 1530 / self.frame_count.max(1)) as u32;
        let (seg, off) = (t / 255, (t % 255) as u8);
        match seg {
            0 => [255, off, 0, 255],
            1 => [255 - off, 255, 0, 255],
            2 => [0, 255, off, 255],
            3 => [0, 255 - off, 255, 255],
            4 => [off, 0, 255, 255],
            _ => [255, 0, 255 - off, 255],
        }
    }
}

impl FrameSource for SyntheticSource {
    fn decode(&self, index: usize) -> Result<Frame, FrameError> {
        if index >= self.frame_count {
            return Err(FrameError::MissingFrame { index });
        }
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        Ok(Frame::solid(self.width, self.height, self.color(index)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::DELAY_DEFAULT;

    // black, red, green, blue
    const PALETTE: [u8; 12] = [0, 0, 0, 255, 0, 0, 0, 255, 0, 0, 0, 255];
    const CLEAR: u8 = 0;
    const RED: u8 = 1;
    const GREEN: u8 = 2;
    const BLUE: u8 = 3;

    fn patch(area: (u16, u16, u16, u16), pixels: Vec<u8>, dispose: DisposalMethod) -> gif::Frame<'static> {
        let (left, top, width, height) = area;
        let mut frame = gif::Frame::from_indexed_pixels(width, height, pixels, Some(CLEAR));
        frame.left = left;
        frame.top = top;
        frame.dispose = dispose;
        frame.delay = 5;
        frame
    }

    fn solid(width: u16, height: u16, color: u8, delay_cs: u16) -> gif::Frame<'static> {
        let mut frame = patch((0, 0, width, height), vec![color; width as usize * height as usize], DisposalMethod::Keep);
        frame.delay = delay_cs;
        frame
    }

    fn encode(width: u16, height: u16, repeat: Option<Repeat>, frames: &[gif::Frame<'static>]) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut encoder = gif::Encoder::new(&mut out, width, height, &PALETTE).unwrap();
            if let Some(r) = repeat {
                encoder.set_repeat(r).unwrap();
            }
            for frame in frames {
                encoder.write_frame(frame).unwrap();
            }
        }
        out
    }

    fn pixel(frame: &Frame, x: u32, y: u32) -> [u8; 4] {
        let at = ((y * frame.width() + x) * 4) as usize;
        frame.pixels()[at..at + 4].try_into().unwrap()
    }

    /// 4x2 canvas exercising every disposal method
    fn disposal_gif() -> Vec<u8> {
        let mut marked = vec![CLEAR; 8];
        marked[7] = GREEN;
        encode(
            4,
            2,
            Some(Repeat::Infinite),
            &[
                solid(4, 2, RED, 5),
                patch((1, 0, 2, 1), vec![GREEN; 2], DisposalMethod::Background),
                patch((0, 1, 1, 1), vec![BLUE], DisposalMethod::Keep),
                patch((0, 0, 4, 2), marked, DisposalMethod::Previous),
                patch((3, 0, 1, 1), vec![BLUE], DisposalMethod::Keep),
            ],
        )
    }

    #[test]
    fn test_open_gif_metadata() {
        let data = encode(
            4,
            3,
            Some(Repeat::Finite(4)),
            &[solid(4, 3, RED, 7), solid(4, 3, GREEN, 7), solid(4, 3, BLUE, 7)],
        );
        let (image, source) = GifSource::open(data).unwrap();

        assert_eq!(image.frame_count(), 3);
        assert_eq!(image.size(), (4, 3));
        assert_eq!(image.loop_count(), 4);
        assert_eq!(image.poster_index(), 0);
        assert_eq!(image.delay(1), Duration::from_millis(70));

        let frame = source.decode(2).unwrap();
        assert_eq!((frame.width(), frame.height()), (4, 3));
        assert_eq!(pixel(&frame, 0, 0), [0, 0, 255, 255]);
    }

    #[test]
    fn test_open_gif_infinite_and_default_loops() {
        let forever = encode(2, 2, Some(Repeat::Infinite), &[solid(2, 2, RED, 5), solid(2, 2, BLUE, 5)]);
        let (image, _) = GifSource::open(forever).unwrap();
        assert_eq!(image.loops(), None);

        let once = encode(2, 2, None, &[solid(2, 2, RED, 5), solid(2, 2, BLUE, 5)]);
        let (image, _) = GifSource::open(once).unwrap();
        assert_eq!(image.loop_count(), 1);
    }

    #[test]
    fn test_loop_marker_inside_comment_ignored() {
        let mut out = Vec::new();
        {
            let mut encoder = gif::Encoder::new(&mut out, 1, 1, &PALETTE).unwrap();
            encoder.write_raw_extension(gif::AnyExtension(0xfe), &[&b"NETSCAPE2.0"[..]]).unwrap();
            encoder.set_repeat(Repeat::Infinite).unwrap();
            encoder.write_frame(&solid(1, 1, RED, 5)).unwrap();
        }
        let (image, _) = GifSource::open(out).unwrap();
        assert_eq!(image.loop_count(), 0);

        // Looks like a loop block with count 5, but it is comment text
        let mut out = Vec::new();
        {
            let mut encoder = gif::Encoder::new(&mut out, 1, 1, &PALETTE).unwrap();
            encoder
                .write_raw_extension(gif::AnyExtension(0xfe), &[&b"NETSCAPE2.0\x03\x01\x05\x00"[..]])
                .unwrap();
            encoder.write_frame(&solid(1, 1, RED, 5)).unwrap();
        }
        let (image, _) = GifSource::open(out).unwrap();
        assert_eq!(image.loop_count(), 1);
    }

    #[test]
    fn test_loop_count_mapping() {
        assert_eq!(loop_count_of(Repeat::Infinite), 0);
        assert_eq!(loop_count_of(Repeat::Finite(0)), 1);
        assert_eq!(loop_count_of(Repeat::Finite(300)), 300);
    }

    #[test]
    fn test_short_delays_clamped() {
        let data = encode(2, 2, None, &[solid(2, 2, RED, 1), solid(2, 2, GREEN, 1)]);
        let (image, _) = GifSource::open(data).unwrap();
        assert_eq!(image.delay(0), DELAY_DEFAULT);
    }

    #[test]
    fn test_decode_past_end() {
        let data = encode(2, 2, None, &[solid(2, 2, RED, 5)]);
        let (_, source) = GifSource::open(data).unwrap();
        assert!(matches!(source.decode(5), Err(FrameError::MissingFrame { index: 5 })));
        // The cursor recovers after running off the end
        assert_eq!(pixel(&source.decode(0).unwrap(), 0, 0), [255, 0, 0, 255]);
    }

    #[test]
    fn test_reject_non_gif() {
        let result = GifSource::open(b"\x89PNG\r\n\x1a\nnot really".to_vec());
        assert!(matches!(result, Err(CacheError::InvalidSource(_))));

        let truncated = GifSource::open(b"GIF89a".to_vec());
        assert!(matches!(truncated, Err(CacheError::InvalidSource(_))));
    }

    #[test]
    fn test_disposal_compositing() {
        let (image, source) = GifSource::open(disposal_gif()).unwrap();
        assert_eq!(image.frame_count(), 5);

        let f1 = source.decode(1).unwrap();
        assert_eq!(pixel(&f1, 0, 0), [255, 0, 0, 255]);
        assert_eq!(pixel(&f1, 1, 0), [0, 255, 0, 255]);
        assert_eq!(pixel(&f1, 2, 0), [0, 255, 0, 255]);

        // Frame 1 is cleared to transparent before frame 2 paints
        let f2 = source.decode(2).unwrap();
        assert_eq!(pixel(&f2, 1, 0), [0, 0, 0, 0]);
        assert_eq!(pixel(&f2, 0, 1), [0, 0, 255, 255]);
        assert_eq!(pixel(&f2, 3, 1), [255, 0, 0, 255]);

        let f3 = source.decode(3).unwrap();
        assert_eq!(pixel(&f3, 3, 1), [0, 255, 0, 255]);
        assert_eq!(pixel(&f3, 0, 1), [0, 0, 255, 255]);

        // Frame 3 is rolled back before frame 4 paints
        let f4 = source.decode(4).unwrap();
        assert_eq!(pixel(&f4, 3, 1), [255, 0, 0, 255]);
        assert_eq!(pixel(&f4, 3, 0), [0, 0, 255, 255]);
        assert_eq!(pixel(&f4, 1, 0), [0, 0, 0, 0]);
    }

    #[test]
    fn test_sequential_decode_reuses_cursor() {
        let (_, source) = GifSource::open(disposal_gif()).unwrap();
        let (_, fresh) = GifSource::open(disposal_gif()).unwrap();
        let after_open = source.stream_restarts();

        let forward: Vec<Frame> = (0..5).map(|i| source.decode(i).unwrap()).collect();
        // Poster probing left the cursor past frame 0, so only frame 0 rewinds
        assert_eq!(source.stream_restarts(), after_open + 1);
        let walked = source.stream_restarts();
        for (i, frame) in forward.iter().enumerate().skip(1) {
            assert_eq!(frame.pixels(), fresh.decode(i).unwrap().pixels(), "frame {}", i);
        }
        assert_eq!(source.stream_restarts(), walked);

        // Going backwards rewinds once, then continues forward
        assert_eq!(source.decode(1).unwrap().pixels(), forward[1].pixels());
        assert_eq!(source.decode(3).unwrap().pixels(), forward[3].pixels());
        assert_eq!(source.stream_restarts(), walked + 1);
    }

    #[test]
    fn test_truncated_stream_keeps_good_frames() {
        let mut data = encode(2, 2, Some(Repeat::Infinite), &[solid(2, 2, RED, 5), solid(2, 2, GREEN, 5)]);
        assert_eq!(data.pop(), Some(0x3b));
        // Start of an image descriptor that never finishes
        data.extend_from_slice(&[0x2c, 0x00, 0x00]);

        let (image, source) = GifSource::open(data).unwrap();
        assert_eq!(image.frame_count(), 2);
        assert_eq!(image.poster_index(), 0);
        assert_eq!(pixel(&source.decode(1).unwrap(), 0, 0), [0, 255, 0, 255]);
    }

    #[test]
    fn test_synthetic_source() {
        let (image, source) = SyntheticSource::new(12, 8, 8)
            .open(0, Duration::from_millis(40))
            .unwrap();
        assert_eq!(image.frame_count(), 12);
        assert_eq!(image.loops(), None);
        assert!(source.decode(11).is_ok());
        assert!(source.decode(12).is_err());
        assert_ne!(source.decode(0).unwrap().pixels(), source.decode(6).unwrap().pixels());
    }
}
