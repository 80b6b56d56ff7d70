//! Memory pressure monitors.
//!
//! `ManualPressureMonitor` fires when told to (tests, host integration).
//! `SystemPressureMonitor` polls available memory via `sysinfo` and fires
//! once each time it drops below a threshold.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use sysinfo::System;

use crate::entities::{PressureHandler, PressureMonitor, Subscription};

/// Subscriber list shared by the monitors
#[derive(Default)]
struct HandlerRegistry {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(u64, PressureHandler)>>,
}

impl HandlerRegistry {
    fn subscribe(self: &Arc<Self>, handler: PressureHandler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, handler));

        let registry = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry
                    .handlers
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .retain(|(h, _)| *h != id);
            }
        })
    }

    /// Invoke every handler. The list is copied first so handlers may
    /// (un)subscribe without deadlocking.
    fn notify(&self) -> usize {
        let handlers: Vec<PressureHandler> = self
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in &handlers {
            handler();
        }
        handlers.len()
    }

    fn len(&self) -> usize {
        self.handlers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Pressure source driven by explicit `emit()` calls.
#[derive(Default, Clone)]
pub struct ManualPressureMonitor {
    registry: Arc<HandlerRegistry>,
}

impl ManualPressureMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire a pressure event; returns the number of handlers notified.
    pub fn emit(&self) -> usize {
        let n = self.registry.notify();
        debug!("Memory pressure emitted to {} subscribers", n);
        n
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }
}

impl PressureMonitor for ManualPressureMonitor {
    fn subscribe(&self, handler: PressureHandler) -> Subscription {
        self.registry.subscribe(handler)
    }
}

/// Polls system available memory on a background thread.
///
/// Fires on the transition from "enough" to "below threshold"; it re-arms
/// once available memory recovers. The first poll happens one interval
/// after `start`.
pub struct SystemPressureMonitor {
    registry: Arc<HandlerRegistry>,
    _stop: Sender<()>,
}

impl SystemPressureMonitor {
    pub fn start(threshold_bytes: u64, interval: Duration) -> io::Result<Self> {
        let registry = Arc::new(HandlerRegistry::default());
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let poll_registry = Arc::clone(&registry);

        thread::Builder::new()
            .name("animplay-pressure".into())
            .spawn(move || {
                let mut sys = System::new();
                let mut low = false;
                // First poll one interval after start
                while let Err(RecvTimeoutError::Timeout) = stop_rx.recv_timeout(interval) {
                    sys.refresh_memory();
                    let available = sys.available_memory();
                    let now_low = available < threshold_bytes;
                    if now_low && !low {
                        warn!(
                            "Available memory {} MB below threshold {} MB",
                            available / 1024 / 1024,
                            threshold_bytes / 1024 / 1024
                        );
                        poll_registry.notify();
                    }
                    low = now_low;
                }
                debug!("Pressure monitor stopped");
            })?;

        info!(
            "System pressure monitor: threshold={} MB, interval={}ms",
            threshold_bytes / 1024 / 1024,
            interval.as_millis()
        );

        Ok(Self {
            registry,
            _stop: stop_tx,
        })
    }
}

impl PressureMonitor for SystemPressureMonitor {
    fn subscribe(&self, handler: PressureHandler) -> Subscription {
        self.registry.subscribe(handler)
    }
}
