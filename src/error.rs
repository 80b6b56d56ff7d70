//! Library error taxonomy.
//!
//! Only `InvalidSource` is fatal. Decode failures are recovered inside the
//! cache (slot stays empty, retried on the next look-ahead pass) and are
//! surfaced through logs, stats and `CacheEvent::DecodeFailed`.

use thiserror::Error;

use crate::entities::FrameError;

#[derive(Debug, Error)]
pub enum CacheError {
    /// Payload is not a supported animated image or has no decodable frames
    #[error("invalid source: {0}")]
    InvalidSource(String),

    /// A single frame failed to decode
    #[error("frame {index} failed to decode: {source}")]
    DecodeFailure {
        index: usize,
        #[source]
        source: FrameError,
    },

    /// Caller asked for a frame outside `[0, frame_count)`
    #[error("frame index {index} out of range (frame count {frame_count})")]
    IndexOutOfRange { index: usize, frame_count: usize },

    /// Decode worker thread could not be started
    #[error("failed to spawn decode worker: {0}")]
    Spawn(#[from] std::io::Error),
}
