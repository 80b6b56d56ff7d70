//! Adaptive frame cache with look-ahead prefetch and memory-pressure backoff.
//!
//! Structure: one slot per frame (`Slot::Empty | Slot::Ready`) plus two
//! index sets, `cached` (resident) and `in_flight` (queued or decoding).
//! All of it sits behind a single mutex shared by the consumer (`request`)
//! and decode completions, so purge decisions never race an insert.
//!
//! Policy:
//! - Budget picked once per source from the decoded size (all / 5 / 1),
//!   then narrowed by memory pressure and by the caller's cap.
//! - `request(i)` keeps a forward window of `budget` frames starting at `i`
//!   (wrapping), schedules missing ones on a single decode worker in window
//!   order, and drops everything outside the window once over budget.
//! - The poster frame is pinned. It may sit outside the window, so the
//!   resident count is bounded by `effective_budget() + 1`.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crossbeam_channel::Receiver;
use log::{debug, info, trace, warn};

use crate::core::cache_events::{CacheEvent, CacheEvents};
use crate::core::cache_man::{CacheConfig, CacheManager};
use crate::core::timer::DeferredTimer;
use crate::core::workers::Workers;
use crate::entities::{AnimatedImage, Frame, FrameError, FrameSource, PressureMonitor, Subscription};
use crate::error::CacheError;

/// Cache statistics for monitoring performance
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    decode_failures: AtomicU64,
    stale_completions: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale(&self) {
        self.stale_completions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    pub fn stale_completions(&self) -> u64 {
        self.stale_completions.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.decode_failures.store(0, Ordering::Relaxed);
        self.stale_completions.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time view of the cache
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub decode_failures: u64,
    pub stale_completions: u64,
    pub resident: usize,
    pub budget: usize,
    pub bytes: usize,
}

impl CacheStatsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }
}

#[derive(Debug, Clone, Default)]
enum Slot {
    #[default]
    Empty,
    Ready(Frame),
}

impl Slot {
    fn frame(&self) -> Option<&Frame> {
        match self {
            Slot::Ready(frame) => Some(frame),
            Slot::Empty => None,
        }
    }
}

/// Two-step recovery after a pressure event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegrowStage {
    /// Low-memory budget → intermediate budget
    Grow,
    /// Intermediate budget → no override
    Reset,
}

struct FrameCacheState {
    image: Arc<AnimatedImage>,
    source: Arc<dyn FrameSource>,
    slots: Vec<Slot>,
    cached: BTreeSet<usize>,
    in_flight: BTreeSet<usize>,
    requested_index: usize,
    optimal_budget: usize,
    /// 0 = no override
    pressure_budget: usize,
    /// 0 = no cap
    budget_cap: usize,
    pressure_events: u32,
    /// Tags regrowth timers; bumped on every pressure change
    pressure_generation: u64,
    regrow_timer: Option<DeferredTimer>,
}

impl FrameCacheState {
    fn new(
        image: Arc<AnimatedImage>,
        source: Arc<dyn FrameSource>,
        config: &CacheConfig,
        budget_cap: usize,
    ) -> Self {
        let frame_count = image.frame_count();
        let poster = image.poster_index();
        let mut slots = vec![Slot::Empty; frame_count];
        slots[poster] = Slot::Ready(image.poster().clone());

        Self {
            optimal_budget: config.optimal_budget(image.bytes_per_frame(), frame_count),
            image,
            source,
            slots,
            cached: BTreeSet::from([poster]),
            in_flight: BTreeSet::new(),
            requested_index: 0,
            pressure_budget: 0,
            budget_cap,
            pressure_events: 0,
            pressure_generation: 0,
            regrow_timer: None,
        }
    }

    fn frame_count(&self) -> usize {
        self.slots.len()
    }

    fn poster_index(&self) -> usize {
        self.image.poster_index()
    }

    /// Optimal budget narrowed by any positive override
    fn effective_budget(&self) -> usize {
        [self.pressure_budget, self.budget_cap]
            .into_iter()
            .filter(|&b| b > 0)
            .fold(self.optimal_budget, usize::min)
    }

    /// Look-ahead window in scheduling order: `start`, `start + 1`, ... wrapping
    fn window(&self, start: usize) -> Vec<usize> {
        let n = self.frame_count();
        let len = self.effective_budget().min(n);
        (0..len).map(|k| (start + k) % n).collect()
    }

    /// Window plus the pinned poster
    fn indexes_to_cache(&self, start: usize) -> BTreeSet<usize> {
        let mut keep: BTreeSet<usize> = self.window(start).into_iter().collect();
        keep.insert(self.poster_index());
        keep
    }

    /// Missing window entries, marked in-flight. Empty once everything is resident.
    fn plan_fetch(&mut self, index: usize) -> Vec<usize> {
        if self.cached.len() >= self.frame_count() {
            return Vec::new();
        }
        let poster = self.poster_index();
        let fetch: Vec<usize> = self
            .window(index)
            .into_iter()
            .filter(|i| *i != poster && !self.cached.contains(i) && !self.in_flight.contains(i))
            .collect();
        self.in_flight.extend(fetch.iter().copied());
        fetch
    }

    /// When over budget, drop every resident frame outside the window of the
    /// last requested index. Returns the number of bytes released.
    fn purge(&mut self) -> usize {
        if self.cached.len() <= self.effective_budget() {
            return 0;
        }
        let keep = self.indexes_to_cache(self.requested_index);
        let evict: Vec<usize> = self.cached.difference(&keep).copied().collect();

        let mut freed = 0;
        for index in &evict {
            self.cached.remove(index);
            if let Slot::Ready(frame) = std::mem::take(&mut self.slots[*index]) {
                freed += frame.mem();
            }
        }
        if !evict.is_empty() {
            debug!("Purged frames {:?} (budget {})", evict, self.effective_budget());
        }
        freed
    }

    /// Store a decoded frame. Returns bytes added (0 if already resident).
    fn insert(&mut self, index: usize, frame: Frame) -> usize {
        if self.cached.contains(&index) {
            return 0;
        }
        let bytes = frame.mem();
        self.slots[index] = Slot::Ready(frame);
        self.cached.insert(index);
        bytes
    }

    fn resident(&self) -> Vec<usize> {
        self.cached.iter().copied().collect()
    }

    fn resident_bytes(&self) -> usize {
        self.slots.iter().filter_map(Slot::frame).map(Frame::mem).sum()
    }
}

/// State reachable from decode jobs, timers and pressure handlers
struct Shared {
    state: Mutex<FrameCacheState>,
    manager: CacheManager,
    stats: CacheStats,
    events: CacheEvents,
    config: CacheConfig,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, FrameCacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_in_flight(&self, index: usize) -> bool {
        self.lock_state().in_flight.contains(&index)
    }

    /// Purge to budget and publish the new resident set if anything changed.
    fn purge_locked(&self, state: &mut FrameCacheState) {
        let before = state.cached.len();
        let freed = state.purge();
        self.manager.free_memory(freed);
        if state.cached.len() != before {
            self.events.emit(CacheEvent::CachedFramesChanged(state.resident()));
        }
    }

    fn complete_decode(&self, epoch: u64, index: usize, result: Result<Frame, FrameError>) {
        let mut state = self.lock_state();
        if self.manager.current_epoch() != epoch {
            self.stats.record_stale();
            trace!("Dropping stale decode of frame {} (epoch {})", index, epoch);
            return;
        }
        state.in_flight.remove(&index);

        match result {
            Ok(frame) => {
                let added = state.insert(index, frame);
                self.manager.add_memory(added);
                trace!("Cached frame {} ({} bytes)", index, added);
                let before = state.cached.len();
                let freed = state.purge();
                self.manager.free_memory(freed);
                if added > 0 || state.cached.len() != before {
                    self.events.emit(CacheEvent::CachedFramesChanged(state.resident()));
                }
            }
            Err(source) => {
                self.stats.record_decode_failure();
                warn!("{}", CacheError::DecodeFailure { index, source });
                self.events.emit(CacheEvent::DecodeFailed(index));
            }
        }
    }

    fn on_memory_pressure(self: &Arc<Self>) {
        let mut state = self.lock_state();
        state.pressure_events += 1;
        state.pressure_generation += 1;
        state.regrow_timer = None;

        let before = state.effective_budget();
        state.pressure_budget = self.config.low_memory_budget.max(1);
        warn!(
            "Memory pressure #{}: budget {} -> {}",
            state.pressure_events,
            before,
            state.effective_budget()
        );
        self.purge_locked(&mut state);

        if state.pressure_events < self.config.grow_attempts_max {
            let generation = state.pressure_generation;
            state.regrow_timer = self.schedule_regrow(generation, RegrowStage::Grow);
        } else {
            info!(
                "Pressure ceiling reached ({} events), holding low-memory budget until reset",
                state.pressure_events
            );
        }
    }

    fn schedule_regrow(self: &Arc<Self>, generation: u64, stage: RegrowStage) -> Option<DeferredTimer> {
        let weak = Arc::downgrade(self);
        let delay = Duration::from_millis(self.config.pressure_cooldown_ms);
        let scheduled = DeferredTimer::schedule(delay, move || {
            if let Some(shared) = weak.upgrade() {
                shared.apply_regrow(generation, stage);
            }
        });
        match scheduled {
            Ok(timer) => Some(timer),
            Err(e) => {
                warn!("Failed to schedule cache regrowth: {}", e);
                None
            }
        }
    }

    fn apply_regrow(self: &Arc<Self>, generation: u64, stage: RegrowStage) {
        let mut state = self.lock_state();
        if state.pressure_generation != generation {
            trace!("Ignoring stale {:?} (generation {})", stage, generation);
            return;
        }
        match stage {
            RegrowStage::Grow => {
                state.pressure_budget = self.config.grow_budget;
                info!("Cache regrowing after pressure: budget {}", state.effective_budget());
                self.purge_locked(&mut state);
                state.regrow_timer = self.schedule_regrow(generation, RegrowStage::Reset);
            }
            RegrowStage::Reset => {
                state.pressure_budget = 0;
                state.regrow_timer = None;
                info!("Cache pressure override cleared: budget {}", state.effective_budget());
            }
        }
    }
}

/// Bounded, self-filling cache of decoded frames for one animated image.
///
/// `request` never blocks on decoding; misses return `None` and queue the
/// decode. Memory pressure shrinks the budget to one frame and regrows it
/// in two cooldown steps.
pub struct FrameCache {
    // Field order is drop order: unsubscribe, release state, join worker
    pressure_subscription: Mutex<Option<Subscription>>,
    shared: Arc<Shared>,
    workers: Workers,
}

impl FrameCache {
    /// Create a cache for `image`, decoding through `source`.
    ///
    /// The poster frame from `image` is resident from the start.
    pub fn new(
        image: AnimatedImage,
        source: Arc<dyn FrameSource>,
        config: CacheConfig,
    ) -> Result<Self, CacheError> {
        let image = Arc::new(image);
        let state = FrameCacheState::new(Arc::clone(&image), source, &config, config.budget_cap);
        let manager = CacheManager::new();
        manager.add_memory(state.resident_bytes());

        let workers = Workers::new(1, "decode", manager.epoch_ref())?;

        info!(
            "FrameCache created: {} frames, {}x{}, optimal budget {}, cap {}",
            image.frame_count(),
            image.size().0,
            image.size().1,
            state.optimal_budget,
            state.budget_cap
        );

        Ok(Self {
            pressure_subscription: Mutex::new(None),
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                manager,
                stats: CacheStats::new(),
                events: CacheEvents::new(),
                config,
            }),
            workers,
        })
    }

    /// Frame `index` if resident, scheduling decodes for the look-ahead window.
    ///
    /// Out-of-range indices are rejected without touching any state.
    pub fn request(&self, index: usize) -> Result<Option<Frame>, CacheError> {
        let shared = &self.shared;
        let mut state = shared.lock_state();

        let frame_count = state.frame_count();
        if index >= frame_count {
            return Err(CacheError::IndexOutOfRange { index, frame_count });
        }

        state.requested_index = index;
        shared.events.emit(CacheEvent::FrameRequested(index));

        let to_fetch = state.plan_fetch(index);
        if !to_fetch.is_empty() {
            let epoch = shared.manager.current_epoch();
            trace!("Scheduling decode of {:?} (requested {})", to_fetch, index);
            for i in to_fetch {
                self.schedule_decode(epoch, Arc::clone(&state.source), i);
            }
        }

        shared.purge_locked(&mut state);

        let frame = state.slots[index].frame().cloned();
        if frame.is_some() {
            shared.stats.record_hit();
        } else {
            shared.stats.record_miss();
        }
        Ok(frame)
    }

    fn schedule_decode(&self, epoch: u64, source: Arc<dyn FrameSource>, index: usize) {
        let weak = Arc::downgrade(&self.shared);
        self.workers.execute_with_epoch(epoch, move || {
            // Cache gone: nothing to fill
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if !shared.is_in_flight(index) {
                trace!("Frame {} no longer requested, skipping decode", index);
                return;
            }
            let result = source.decode(index);
            shared.complete_decode(epoch, index, result);
        });
    }

    /// Switch to a new animated image.
    ///
    /// Queued and running decodes of the old source are discarded, pressure
    /// state and pending regrowth are reset. The caller's budget cap stays.
    pub fn replace_source(&self, image: AnimatedImage, source: Arc<dyn FrameSource>) {
        let shared = &self.shared;
        let mut state = shared.lock_state();

        let epoch = shared.manager.increment_epoch();
        let dropped = state.in_flight.len();
        shared.manager.free_memory(state.resident_bytes());

        // Keep generations monotonic so old timers can never match
        let next_generation = state.pressure_generation + 1;
        let cap = state.budget_cap;
        *state = FrameCacheState::new(Arc::new(image), source, &shared.config, cap);
        state.pressure_generation = next_generation;
        shared.manager.add_memory(state.resident_bytes());

        info!(
            "Source replaced (epoch {}): {} frames, optimal budget {}, {} pending decodes dropped",
            epoch,
            state.frame_count(),
            state.optimal_budget,
            dropped
        );
        shared.events.emit(CacheEvent::SourceReplaced(epoch));
        shared.events.emit(CacheEvent::CachedFramesChanged(state.resident()));
    }

    /// Handle a memory pressure event (also wired up by `attach_pressure_monitor`)
    pub fn on_memory_pressure(&self) {
        self.shared.on_memory_pressure();
    }

    /// Clear the pressure override and event count; allows regrowth again.
    pub fn reset_pressure(&self) {
        let mut state = self.shared.lock_state();
        state.pressure_events = 0;
        state.pressure_generation += 1;
        state.regrow_timer = None;
        state.pressure_budget = 0;
        info!("Pressure state reset: budget {}", state.effective_budget());
    }

    /// Subscribe to `monitor` for the lifetime of the cache (replaces any
    /// previous subscription).
    pub fn attach_pressure_monitor(&self, monitor: &dyn PressureMonitor) {
        let weak = Arc::downgrade(&self.shared);
        let subscription = monitor.subscribe(Arc::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.on_memory_pressure();
            }
        }));
        *self
            .pressure_subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(subscription);
    }

    pub fn detach_pressure_monitor(&self) {
        self.pressure_subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }

    /// Caller ceiling on resident frames, 0 = none. Lowering it purges at once.
    pub fn set_budget_cap(&self, cap: usize) {
        let shared = &self.shared;
        let mut state = shared.lock_state();
        state.budget_cap = cap;
        debug!("Budget cap set to {} (effective {})", cap, state.effective_budget());
        shared.purge_locked(&mut state);
    }

    pub fn budget_cap(&self) -> usize {
        self.shared.lock_state().budget_cap
    }

    pub fn effective_budget(&self) -> usize {
        self.shared.lock_state().effective_budget()
    }

    pub fn optimal_budget(&self) -> usize {
        self.shared.lock_state().optimal_budget
    }

    /// Current memory-pressure override, 0 = none
    pub fn pressure_budget(&self) -> usize {
        self.shared.lock_state().pressure_budget
    }

    pub fn image(&self) -> Arc<AnimatedImage> {
        Arc::clone(&self.shared.lock_state().image)
    }

    pub fn poster(&self) -> Frame {
        self.shared.lock_state().image.poster().clone()
    }

    pub fn frame_count(&self) -> usize {
        self.shared.lock_state().frame_count()
    }

    /// Source epoch; changes on every `replace_source`
    pub fn generation(&self) -> u64 {
        self.shared.manager.current_epoch()
    }

    pub fn requested_index(&self) -> usize {
        self.shared.lock_state().requested_index
    }

    /// Resident frame indices, ascending
    pub fn cached_indexes(&self) -> Vec<usize> {
        self.shared.lock_state().resident()
    }

    /// Indices queued or decoding, ascending
    pub fn in_flight_indexes(&self) -> Vec<usize> {
        self.shared.lock_state().in_flight.iter().copied().collect()
    }

    pub fn resident_count(&self) -> usize {
        self.shared.lock_state().cached.len()
    }

    /// Bytes held by resident frames
    pub fn mem(&self) -> usize {
        self.shared.manager.mem()
    }

    /// Observe requests and resident-set changes
    pub fn subscribe(&self) -> Receiver<CacheEvent> {
        self.shared.events.subscribe()
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        let state = self.shared.lock_state();
        let stats = &self.shared.stats;
        CacheStatsSnapshot {
            hits: stats.hits(),
            misses: stats.misses(),
            decode_failures: stats.decode_failures(),
            stale_completions: stats.stale_completions(),
            resident: state.cached.len(),
            budget: state.effective_budget(),
            bytes: self.shared.manager.mem(),
        }
    }

    pub fn reset_stats(&self) {
        self.shared.stats.reset();
    }
}

impl Drop for FrameCache {
    fn drop(&mut self) {
        // Jobs and timers may still hold the shared state briefly; make sure
        // no deferred regrowth applies after teardown.
        let mut state = self.shared.lock_state();
        state.pressure_generation += 1;
        state.regrow_timer = None;
        trace!("FrameCache dropped ({} decodes pending)", state.in_flight.len());
    }
}
