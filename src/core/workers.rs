//! Background decode queue.
//!
//! Jobs run in FIFO order on a fixed set of named threads. Each frame cache
//! owns a single-thread pool, so decodes are serialized per cache and run in
//! the order the look-ahead window scheduled them. Worker threads run at
//! normal OS priority; the consumer thread never waits on them.
//!
//! Epoch mechanism allows cancelling stale jobs after a source switch.

use crossbeam_channel::{unbounded, Sender};
use log::trace;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// How long `Drop` waits for in-progress jobs before detaching the threads
const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);

/// FIFO worker pool with epoch-checked jobs.
///
/// # Example
/// ```ignore
/// let workers = Workers::new(1, "decode", epoch)?;
/// workers.execute_with_epoch(epoch_now, move || {
///     // decode a frame
/// });
/// ```
pub struct Workers {
    sender: Option<Sender<Job>>,
    handles: Vec<thread::JoinHandle<()>>,
    current_epoch: Arc<AtomicU64>,
}

impl Workers {
    /// Spawn `num_threads` workers named `animplay-{name}-{id}`.
    pub fn new(num_threads: usize, name: &str, epoch: Arc<AtomicU64>) -> io::Result<Self> {
        let (sender, receiver) = unbounded::<Job>();
        let mut handles = Vec::with_capacity(num_threads);

        for worker_id in 0..num_threads.max(1) {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("animplay-{}-{}", name, worker_id))
                .spawn(move || {
                    trace!("Worker {} started", worker_id);
                    // Ends once the sender is dropped and the queue is drained
                    for job in receiver.iter() {
                        job();
                    }
                    trace!("Worker {} stopped", worker_id);
                })?;
            handles.push(handle);
        }

        trace!("Workers initialized: {} threads ({})", handles.len(), name);

        Ok(Self {
            sender: Some(sender),
            handles,
            current_epoch: epoch,
        })
    }

    /// Queue a job unconditionally
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(sender) = &self.sender {
            // Only fails after shutdown, when dropping the job is what we want
            let _ = sender.send(Box::new(f));
        }
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch.load(Ordering::SeqCst)
    }

    /// Queue a job that is skipped if the epoch changed before it starts.
    ///
    /// The check happens at execution time, so a job queued before a source
    /// switch never touches the new source.
    pub fn execute_with_epoch<F>(&self, epoch: u64, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let current_epoch = Arc::clone(&self.current_epoch);
        self.execute(move || {
            if current_epoch.load(Ordering::SeqCst) == epoch {
                f();
            } else {
                trace!("Skipping stale job (epoch {})", epoch);
            }
        });
    }

    /// Number of worker threads
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        let num_threads = self.handles.len();
        trace!("Workers shutting down ({} threads)...", num_threads);

        // Disconnect the queue; workers exit after the current job
        self.sender = None;

        let deadline = Instant::now() + SHUTDOWN_TIMEOUT;
        for handle in std::mem::take(&mut self.handles) {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    trace!("Shutdown timeout reached, detaching remaining workers");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }

        trace!("All {} workers stopped", num_threads);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::wait_until;
    use std::sync::Mutex;

    #[test]
    fn test_fifo_order_single_thread() {
        let epoch = Arc::new(AtomicU64::new(0));
        let workers = Workers::new(1, "test", epoch).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..20 {
            let log = Arc::clone(&log);
            workers.execute(move || log.lock().unwrap().push(i));
        }

        assert!(wait_until(Duration::from_secs(2), || log.lock().unwrap().len() == 20));
        assert_eq!(*log.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_stale_epoch_skipped() {
        let epoch = Arc::new(AtomicU64::new(0));
        let workers = Workers::new(1, "test", Arc::clone(&epoch)).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        // Block the worker so both jobs are queued before the epoch moves
        let (tx, rx) = crossbeam_channel::bounded::<()>(0);
        workers.execute(move || {
            let _ = rx.recv();
        });

        let stale = Arc::clone(&log);
        workers.execute_with_epoch(0, move || stale.lock().unwrap().push("stale"));
        epoch.store(1, Ordering::SeqCst);
        let fresh = Arc::clone(&log);
        workers.execute_with_epoch(1, move || fresh.lock().unwrap().push("fresh"));

        tx.send(()).unwrap();
        assert!(wait_until(Duration::from_secs(2), || !log.lock().unwrap().is_empty()));
        drop(workers);
        assert_eq!(*log.lock().unwrap(), vec!["fresh"]);
    }

    #[test]
    fn test_drop_joins_idle_workers() {
        let epoch = Arc::new(AtomicU64::new(0));
        let workers = Workers::new(2, "test", epoch).unwrap();
        assert_eq!(workers.len(), 2);
        let start = Instant::now();
        drop(workers);
        assert!(start.elapsed() < SHUTDOWN_TIMEOUT);
    }
}
