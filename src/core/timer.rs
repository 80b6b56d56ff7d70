//! Cancellable deferred callback.
//!
//! Used for the memory-pressure cooldown: the cache schedules a regrowth
//! stage and cancels it on a new pressure event, a source switch or
//! teardown. Cancellation is dropping the handle.

use std::io;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use log::trace;

/// Handle to a pending callback. Dropping it cancels the callback if it has
/// not fired yet.
#[derive(Debug)]
pub struct DeferredTimer {
    delay: Duration,
    _cancel: Sender<()>,
}

impl DeferredTimer {
    /// Run `f` on a timer thread after `delay` unless cancelled first.
    pub fn schedule<F>(delay: Duration, f: F) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        thread::Builder::new()
            .name("animplay-timer".into())
            .spawn(move || match cancel_rx.recv_timeout(delay) {
                Err(RecvTimeoutError::Timeout) => f(),
                // Handle dropped (or explicit cancel)
                _ => trace!("DeferredTimer: cancelled"),
            })?;
        trace!("DeferredTimer: scheduled in {}ms", delay.as_millis());
        Ok(Self {
            delay,
            _cancel: cancel_tx,
        })
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Cancel explicitly (same as dropping)
    pub fn cancel(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::wait_until;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_fires_after_delay() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let timer = DeferredTimer::schedule(Duration::from_millis(10), move || {
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();

        // Not immediately
        assert!(!fired.load(Ordering::SeqCst));
        assert!(wait_until(Duration::from_secs(2), || fired.load(Ordering::SeqCst)));
        drop(timer);
    }

    #[test]
    fn test_drop_cancels() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let timer = DeferredTimer::schedule(Duration::from_millis(30), move || {
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(timer.delay(), Duration::from_millis(30));
        timer.cancel();

        std::thread::sleep(Duration::from_millis(80));
        assert!(!fired.load(Ordering::SeqCst));
    }
}
