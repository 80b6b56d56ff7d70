//! Shared fixtures for unit tests: scripted frame sources, a recording
//! surface and a polling helper for eventually-consistent assertions.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::entities::{AnimatedImage, Frame, FrameError, FrameSource, RenderSurface};

/// Frame source with per-index failure injection, a decode log and an
/// optional gate that blocks decoding until released.
pub struct ScriptedSource {
    frame_count: usize,
    width: u32,
    height: u32,
    tag: u8,
    failing: Mutex<HashSet<usize>>,
    decoded: Mutex<Vec<usize>>,
    gate: Mutex<bool>,
    gate_cv: Condvar,
    blocked: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(frame_count: usize, width: u32, height: u32) -> Self {
        Self {
            frame_count,
            width,
            height,
            tag: 0,
            failing: Mutex::new(HashSet::new()),
            decoded: Mutex::new(Vec::new()),
            gate: Mutex::new(false),
            gate_cv: Condvar::new(),
            blocked: AtomicUsize::new(0),
        }
    }

    /// Tag written into the green channel of every frame
    pub fn with_tag(mut self, tag: u8) -> Self {
        self.tag = tag;
        self
    }

    pub fn fail_index(&self, index: usize) {
        self.failing.lock().unwrap().insert(index);
    }

    pub fn heal_index(&self, index: usize) {
        self.failing.lock().unwrap().remove(&index);
    }

    /// Block every decode until `release()`
    pub fn hold(&self) {
        *self.gate.lock().unwrap() = true;
    }

    pub fn release(&self) {
        *self.gate.lock().unwrap() = false;
        self.gate_cv.notify_all();
    }

    /// Decodes currently parked on the gate
    pub fn blocked(&self) -> usize {
        self.blocked.load(Ordering::SeqCst)
    }

    /// Indices passed to `decode`, in call order
    pub fn decoded(&self) -> Vec<usize> {
        self.decoded.lock().unwrap().clone()
    }

    pub fn frame_for(&self, index: usize) -> Frame {
        Frame::solid(self.width, self.height, [index as u8, self.tag, 0, 255])
    }

    /// Metadata for this source with uniform delays
    pub fn image(&self, loop_count: u32, delay: Duration) -> AnimatedImage {
        AnimatedImage::probe(self, loop_count, vec![delay; self.frame_count]).unwrap()
    }
}

impl FrameSource for ScriptedSource {
    fn decode(&self, index: usize) -> Result<Frame, FrameError> {
        {
            let mut held = self.gate.lock().unwrap();
            if *held {
                self.blocked.fetch_add(1, Ordering::SeqCst);
                while *held {
                    held = self.gate_cv.wait(held).unwrap();
                }
                self.blocked.fetch_sub(1, Ordering::SeqCst);
            }
        }
        self.decoded.lock().unwrap().push(index);
        if index >= self.frame_count {
            return Err(FrameError::MissingFrame { index });
        }
        if self.failing.lock().unwrap().contains(&index) {
            return Err(FrameError::Decode(format!("scripted failure at {}", index)));
        }
        Ok(self.frame_for(index))
    }
}

/// Surface that records every redraw request
#[derive(Default)]
pub struct RecordingSurface {
    pub redraws: Vec<Frame>,
}

impl RenderSurface for RecordingSurface {
    fn request_redraw(&mut self, frame: &Frame) {
        self.redraws.push(frame.clone());
    }
}

/// Poll `cond` every millisecond until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
}
