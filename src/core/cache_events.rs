//! Cache observer events.
//!
//! Any number of observers can `subscribe()`; each gets a bounded channel.
//! Events are dropped for observers that fall behind, and disconnected
//! observers are pruned on the next emit.

use std::sync::Mutex;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::trace;

/// Maximum queued events per observer before new ones are dropped
const MAX_QUEUE_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// `request(index)` was called
    FrameRequested(usize),
    /// Resident index set changed; carries the new set in ascending order
    CachedFramesChanged(Vec<usize>),
    /// A decode attempt failed; the slot stays empty
    DecodeFailed(usize),
    /// The cache switched to a new source under this epoch
    SourceReplaced(u64),
}

#[derive(Default)]
pub struct CacheEvents {
    observers: Mutex<Vec<Sender<CacheEvent>>>,
}

impl CacheEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<CacheEvent> {
        let (tx, rx) = bounded(MAX_QUEUE_SIZE);
        self.observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    /// Non-blocking; safe to call while holding the cache state lock.
    pub fn emit(&self, event: CacheEvent) {
        let mut observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
        if observers.is_empty() {
            return;
        }
        observers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!("Cache observer queue full ({} events), dropping {:?}", MAX_QUEUE_SIZE, event);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
