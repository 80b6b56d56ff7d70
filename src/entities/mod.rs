//! Data model and collaborator traits: frames, animated image metadata,
//! frame sources.

pub mod frame;
pub mod image;
pub mod loader;
pub mod traits;

pub use frame::{Frame, FrameError, PixelFormat};
pub use image::{clamp_delay, AnimatedImage, DELAY_DEFAULT, DELAY_MIN};
pub use loader::{GifSource, SyntheticSource};
pub use traits::{FrameSource, PressureHandler, PressureMonitor, RenderSurface, Subscription};
