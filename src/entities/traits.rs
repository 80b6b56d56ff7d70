//! Abstract collaborator interfaces.
//!
//! The cache and the playback driver only talk to decoders, renderers and
//! memory monitors through these traits. Implementations live in
//! `entities::loader`, `core::pressure` and the runner.

use std::fmt;
use std::sync::Arc;

use super::frame::{Frame, FrameError};

/// Decode primitive: frame N of an encoded source → normalized bitmap.
///
/// Called from the decode worker thread. Must be a pure function of the
/// underlying encoded data, so retries after a failure are meaningful.
pub trait FrameSource: Send + Sync {
    fn decode(&self, index: usize) -> Result<Frame, FrameError>;
}

/// Rendering surface the playback driver pushes redraws to.
pub trait RenderSurface {
    /// Draw `frame` on the next display pass.
    fn request_redraw(&mut self, frame: &Frame);
}

/// Callback fired on a memory pressure event
pub type PressureHandler = Arc<dyn Fn() + Send + Sync>;

/// Source of memory pressure events.
pub trait PressureMonitor: Send + Sync {
    /// Register `handler`. It stays registered until the returned guard drops.
    fn subscribe(&self, handler: PressureHandler) -> Subscription;
}

/// Registration guard; unsubscribes on drop.
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

/// Blanket impl: Arc<T> implements FrameSource if T does
impl<T: FrameSource + ?Sized> FrameSource for Arc<T> {
    fn decode(&self, index: usize) -> Result<Frame, FrameError> {
        (**self).decode(index)
    }
}

impl<T: RenderSurface + ?Sized> RenderSurface for &mut T {
    fn request_redraw(&mut self, frame: &Frame) {
        (**self).request_redraw(frame)
    }
}
