//! Generation ring: the age-bucket ledger that decides what gets evicted.
//!
//! Every cached value lives in exactly one [`SlotArena`] slot owned by the
//! ring. Indexes only hold [`SlotId`] handles, so evicting a node here is all
//! it takes for every index to stop seeing it.
//!
//! ## Architecture
//!
//! ```text
//!   buckets: [AgeBucket; 265], addressed by generation % 265
//!
//!        oldest                                          current
//!          │                                                │
//!          ▼                                                ▼
//!   ┌────────────┬────────────┬─────┬────────────┬────────────┐
//!   │ gen 17     │ gen 18     │ ... │ gen 41     │ gen 42     │
//!   │ start/stop │ start/stop │     │ start/stop │ start/open │
//!   │ [a, b, c]  │ [d]        │     │ [e, f]     │ [g]        │
//!   └────────────┴────────────┴─────┴────────────┴────────────┘
//!
//!   arena: SlotArena<Node>           Node { value: Arc<V>, generation }
//! ```
//!
//! A touch only rewrites `Node::generation`; the node stays in the member
//! list it was first linked into. When the oldest bucket is retired, members
//! still claimed by it are evicted and members claimed by a newer bucket are
//! moved into that bucket's list.
//!
//! ## Maintenance
//!
//! ```text
//!   check_valid(now)
//!     │  due? (bucket over limit, time slice elapsed, validity deadline)
//!     │  try_lock maintenance ──busy──► Skipped
//!     │  still due?
//!     │  validity check (outside the ledger lock)
//!     ├─ stale or generation > 1_000_000 ──► clear ring, clear indexes
//!     └─ otherwise ──► clean_up: retire oldest buckets, open a new one,
//!                      rebuild indexes if dead entries pile up
//! ```
//!
//! Retirement of the oldest bucket happens while any of these holds:
//! the ring is nearly full, the bucket opened more than `max_age` ago, or
//! the cache is over capacity and the bucket closed at least `min_age` ago.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};

use crate::clock::Clock;
use crate::ds::{SlotArena, SlotId};
use crate::error::CacheError;
#[cfg(feature = "metrics")]
use crate::metrics::{CacheMetrics, CacheMetricsRecorder};
use crate::traits::ValidityCheck;

/// Number of age buckets in the ring.
pub const RING_SIZE: usize = 265;

/// `max_age` is divided into this many time slices; one bucket per slice.
pub const TIME_SLICES: u32 = 240;

/// Upper bound applied to `max_age`.
pub const MAX_AGE_CAP: Duration = Duration::from_secs(12 * 60 * 60);

/// Past this generation number the next maintenance pass clears the cache.
pub const GENERATION_CEILING: u64 = 1_000_000;

/// Buckets kept free between `current` and `oldest`.
const RING_HEADROOM: u64 = 5;

/// A bucket may take `capacity / 20` touches before maintenance is due.
const BUCKET_SHARE: usize = 20;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Derived ring parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RingConfig {
    pub(crate) capacity: usize,
    pub(crate) min_age: Duration,
    pub(crate) max_age: Duration,
    pub(crate) time_slice: Duration,
    pub(crate) bucket_limit: usize,
}

impl RingConfig {
    /// Caps `max_age` at twelve hours and derives the time slice and
    /// per-bucket touch limit.
    pub(crate) fn new(capacity: usize, min_age: Duration, max_age: Duration) -> Self {
        let max_age = max_age.min(MAX_AGE_CAP);
        Self {
            capacity,
            min_age,
            max_age,
            time_slice: max_age / TIME_SLICES,
            bucket_limit: capacity / BUCKET_SHARE,
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// A cached value plus the generation that currently claims it.
#[derive(Debug)]
pub(crate) struct Node<V> {
    pub(crate) value: Arc<V>,
    pub(crate) generation: u64,
}

#[derive(Debug)]
struct AgeBucket {
    start: Instant,
    stop: Instant,
    members: Vec<SlotId>,
}

/// Outcome of one clean-up pass over the generation ring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Buckets retired.
    pub retired: usize,
    /// Nodes evicted because their bucket was retired.
    pub evicted: usize,
    /// Touched nodes moved into a newer bucket.
    pub relinked: usize,
    /// Whether the indexes were rebuilt to shed dead entries.
    pub rebuilt: bool,
}

/// What a validity/size check ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Maintenance {
    /// Nothing was due.
    NotDue,
    /// Maintenance was due but another thread was already running it.
    Skipped,
    /// An incremental clean-up pass ran.
    CleanedUp(CleanupReport),
    /// The cache was emptied (stale backing store or generation ceiling).
    Flushed,
}

/// Mutable ring state, guarded by [`GenerationRing`]'s ledger lock.
#[derive(Debug)]
pub(crate) struct RingState<V> {
    arena: SlotArena<Node<V>>,
    buckets: Vec<AgeBucket>,
    current: u64,
    oldest: u64,
    /// Index entries created since the last rebuild; `total - live` estimates
    /// how many dead handles the indexes hold.
    total: usize,
}

impl<V> RingState<V> {
    fn new(now: Instant, capacity: usize) -> Self {
        let buckets = (0..RING_SIZE)
            .map(|_| AgeBucket {
                start: now,
                stop: now,
                members: Vec::new(),
            })
            .collect();
        Self {
            arena: SlotArena::with_capacity(capacity),
            buckets,
            current: 0,
            oldest: 0,
            total: 0,
        }
    }

    #[inline]
    fn bucket(&self, generation: u64) -> &AgeBucket {
        &self.buckets[(generation % RING_SIZE as u64) as usize]
    }

    #[inline]
    fn bucket_mut(&mut self, generation: u64) -> &mut AgeBucket {
        &mut self.buckets[(generation % RING_SIZE as u64) as usize]
    }

    /// Links a new node into the current bucket.
    fn insert(&mut self, value: Arc<V>) -> SlotId {
        let generation = self.current;
        let id = self.arena.insert(Node { value, generation });
        self.bucket_mut(generation).members.push(id);
        id
    }

    /// Claims a live node for the current generation. The flag is `true` if
    /// the node was claimed by an older bucket before.
    fn touch(&mut self, id: SlotId) -> Option<(Arc<V>, bool)> {
        let current = self.current;
        let node = self.arena.get_mut(id)?;
        let moved = node.generation != current;
        node.generation = current;
        Some((Arc::clone(&node.value), moved))
    }

    pub(crate) fn get(&self, id: SlotId) -> Option<&Arc<V>> {
        self.arena.get(id).map(|node| &node.value)
    }

    fn evict(&mut self, id: SlotId) -> bool {
        self.arena.remove(id).is_some()
    }

    /// Live nodes in slot order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (SlotId, &Arc<V>)> {
        self.arena.iter().map(|(id, node)| (id, &node.value))
    }

    pub(crate) fn live(&self) -> usize {
        self.arena.len()
    }

    pub(crate) fn total(&self) -> usize {
        self.total
    }

    pub(crate) fn note_index_entry(&mut self) {
        self.total += 1;
    }

    pub(crate) fn generation_span(&self) -> u64 {
        self.current - self.oldest
    }

    /// Retires the oldest bucket and returns `(evicted, relinked)`.
    fn retire_oldest(&mut self) -> (usize, usize) {
        let retired = self.oldest;
        let members = std::mem::take(&mut self.bucket_mut(retired).members);
        let (mut evicted, mut relinked) = (0, 0);
        for id in members {
            let Some(node) = self.arena.get(id) else {
                continue;
            };
            let claimed = node.generation;
            if claimed <= retired {
                self.arena.remove(id);
                evicted += 1;
            } else {
                self.bucket_mut(claimed).members.push(id);
                relinked += 1;
            }
        }
        self.oldest += 1;
        (evicted, relinked)
    }

    /// Closes the current bucket and opens `generation` as the new one.
    fn open_bucket(&mut self, now: Instant, generation: u64) {
        let previous = self.current;
        self.bucket_mut(previous).stop = now;
        self.current = generation;
        let bucket = self.bucket_mut(generation);
        bucket.start = now;
        bucket.stop = now;
        bucket.members.clear();
    }

    /// Drops every node and restarts at generation zero.
    fn reset(&mut self, now: Instant) {
        self.arena.clear();
        for bucket in &mut self.buckets {
            bucket.members.clear();
        }
        self.total = 0;
        self.current = 0;
        self.oldest = 0;
        let bucket = self.bucket_mut(0);
        bucket.start = now;
        bucket.stop = now;
    }

    /// Checks that every live node is claimed by, and linked into, a bucket
    /// between `oldest` and `current`.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let mut linked = rustc_hash::FxHashSet::default();
        for generation in self.oldest..=self.current {
            for &id in &self.bucket(generation).members {
                if let Some(node) = self.arena.get(id) {
                    assert!(
                        node.generation >= generation && node.generation <= self.current,
                        "node claimed by {} linked into bucket {}",
                        node.generation,
                        generation
                    );
                    assert!(linked.insert(id), "node linked twice");
                }
            }
        }
        assert_eq!(linked.len(), self.arena.len(), "unlinked live node");
        assert!(self.current - self.oldest < RING_SIZE as u64);
    }
}

// ---------------------------------------------------------------------------
// Index hooks
// ---------------------------------------------------------------------------

/// Index operations the ring drives during maintenance.
///
/// Called with the ledger lock held; implementations take the index
/// registry and index locks, never the ledger lock.
pub(crate) trait IndexHooks<V> {
    fn clear_indexes(&self) -> Result<(), CacheError>;

    /// Rebuilds every index from the live nodes; returns the entry count of
    /// the last index rebuilt.
    fn rebuild_indexes(&self, state: &RingState<V>) -> Result<usize, CacheError>;
}

// ---------------------------------------------------------------------------
// GenerationRing
// ---------------------------------------------------------------------------

/// Thread-safe owner of the ledger plus the scheduling state that decides
/// when maintenance is due.
pub(crate) struct GenerationRing<V> {
    state: Mutex<RingState<V>>,
    maintenance: Mutex<()>,
    /// Touches and inserts claimed by the current bucket.
    current_size: AtomicUsize,
    /// Nanoseconds since `origin`.
    next_check: AtomicU64,
    next_validity: AtomicU64,
    origin: Instant,
    config: RingConfig,
    clock: Arc<dyn Clock>,
    lock_timeout: Duration,
    validity: Option<Arc<dyn ValidityCheck>>,
    #[cfg(feature = "metrics")]
    metrics: CacheMetrics,
}

impl<V> GenerationRing<V> {
    pub(crate) fn new(
        config: RingConfig,
        clock: Arc<dyn Clock>,
        lock_timeout: Duration,
        validity: Option<Arc<dyn ValidityCheck>>,
    ) -> Self {
        let origin = clock.now();
        let first_deadline = nanos(config.time_slice);
        Self {
            state: Mutex::new(RingState::new(origin, config.capacity)),
            maintenance: Mutex::new(()),
            current_size: AtomicUsize::new(0),
            next_check: AtomicU64::new(first_deadline),
            next_validity: AtomicU64::new(first_deadline),
            origin,
            config,
            clock,
            lock_timeout,
            validity,
            #[cfg(feature = "metrics")]
            metrics: CacheMetrics::new(),
        }
    }

    pub(crate) fn config(&self) -> &RingConfig {
        &self.config
    }

    pub(crate) fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    #[cfg(feature = "metrics")]
    pub(crate) fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Acquires the ledger lock, bounded by the lock timeout.
    pub(crate) fn lock_state(&self) -> Result<MutexGuard<'_, RingState<V>>, CacheError> {
        self.state
            .try_lock_for(self.lock_timeout)
            .ok_or_else(|| CacheError::lock_timeout("generation ring", self.lock_timeout))
    }

    #[inline]
    fn since_origin(&self, now: Instant) -> u64 {
        nanos(now.saturating_duration_since(self.origin))
    }

    /// Adds a node to the current bucket.
    pub(crate) fn admit(&self, state: &mut RingState<V>, value: Arc<V>) -> SlotId {
        let id = state.insert(value);
        self.current_size.fetch_add(1, Ordering::Relaxed);
        id
    }

    /// Touches `id` under an already held ledger lock.
    pub(crate) fn touch_locked(&self, state: &mut RingState<V>, id: SlotId) -> Option<Arc<V>> {
        let (value, moved) = state.touch(id)?;
        if moved {
            self.current_size.fetch_add(1, Ordering::Relaxed);
        }
        Some(value)
    }

    /// Touches `id`; `None` if the node is dead.
    pub(crate) fn touch_handle(&self, id: SlotId) -> Result<Option<Arc<V>>, CacheError> {
        let mut state = self.lock_state()?;
        Ok(self.touch_locked(&mut state, id))
    }

    /// Reads `id` without claiming it for the current generation.
    pub(crate) fn peek_handle(&self, id: SlotId) -> Result<Option<Arc<V>>, CacheError> {
        let state = self.lock_state()?;
        Ok(state.get(id).cloned())
    }

    /// Evicts `id` immediately; `false` if it was already dead.
    pub(crate) fn evict_handle(&self, id: SlotId) -> Result<bool, CacheError> {
        let mut state = self.lock_state()?;
        Ok(state.evict(id))
    }

    fn is_due(&self, now: Instant) -> bool {
        let now = self.since_origin(now);
        self.current_size.load(Ordering::Relaxed) > self.config.bucket_limit
            || now > self.next_check.load(Ordering::Acquire)
            || (self.validity.is_some() && now > self.next_validity.load(Ordering::Acquire))
    }

    /// Runs the validity check if its deadline has passed. Returns `true` if
    /// the backing store reported the cache stale.
    fn consult_validity(&self, now: Instant) -> bool {
        let Some(validity) = &self.validity else {
            return false;
        };
        let at = self.since_origin(now);
        if at < self.next_validity.load(Ordering::Acquire) {
            return false;
        }
        self.next_validity
            .store(at + nanos(self.config.time_slice), Ordering::Release);
        !validity.is_valid()
    }

    /// Runs maintenance if due and nobody else is running it.
    pub(crate) fn check_valid(&self, hooks: &dyn IndexHooks<V>) -> Result<Maintenance, CacheError> {
        let now = self.clock.now();
        if !self.is_due(now) {
            return Ok(Maintenance::NotDue);
        }
        let Some(_maintenance) = self.maintenance.try_lock() else {
            #[cfg(feature = "metrics")]
            self.metrics.record_maintenance_skip();
            return Ok(Maintenance::Skipped);
        };
        if !self.is_due(now) {
            return Ok(Maintenance::NotDue);
        }

        let stale = self.consult_validity(now);
        let mut state = self.lock_state()?;
        if stale || state.current > GENERATION_CEILING {
            tracing::info!(
                stale,
                generation = state.current,
                live = state.live(),
                "flushing cache"
            );
            self.clear_locked(&mut state, now, hooks)?;
            return Ok(Maintenance::Flushed);
        }
        let report = self.clean_up_locked(&mut state, now, hooks)?;
        Ok(Maintenance::CleanedUp(report))
    }

    /// Forces an incremental clean-up pass, ignoring the schedule.
    pub(crate) fn clean_up(&self, hooks: &dyn IndexHooks<V>) -> Result<CleanupReport, CacheError> {
        let now = self.clock.now();
        let _maintenance = self
            .maintenance
            .try_lock_for(self.lock_timeout)
            .ok_or_else(|| CacheError::lock_timeout("maintenance", self.lock_timeout))?;
        let mut state = self.lock_state()?;
        self.clean_up_locked(&mut state, now, hooks)
    }

    /// Empties the ring and every index.
    pub(crate) fn clear(&self, hooks: &dyn IndexHooks<V>) -> Result<(), CacheError> {
        let now = self.clock.now();
        let mut state = self.lock_state()?;
        self.clear_locked(&mut state, now, hooks)
    }

    fn clear_locked(
        &self,
        state: &mut RingState<V>,
        now: Instant,
        hooks: &dyn IndexHooks<V>,
    ) -> Result<(), CacheError> {
        state.reset(now);
        self.restart_slice(now);
        #[cfg(feature = "metrics")]
        self.metrics.record_clear();
        hooks.clear_indexes()
    }

    fn restart_slice(&self, now: Instant) {
        self.current_size.store(0, Ordering::Relaxed);
        self.next_check.store(
            self.since_origin(now) + nanos(self.config.time_slice),
            Ordering::Release,
        );
    }

    fn clean_up_locked(
        &self,
        state: &mut RingState<V>,
        now: Instant,
        hooks: &dyn IndexHooks<V>,
    ) -> Result<CleanupReport, CacheError> {
        let config = &self.config;
        let mut over = state.live() as i64 - config.capacity as i64;
        let mut report = CleanupReport::default();

        while state.current != state.oldest {
            let oldest = state.bucket(state.oldest);
            let ring_full = state.current - state.oldest > RING_SIZE as u64 - RING_HEADROOM;
            let expired = now.saturating_duration_since(oldest.start) > config.max_age;
            let pressured =
                over > 0 && now.saturating_duration_since(oldest.stop) >= config.min_age;
            if !(ring_full || expired || pressured) {
                break;
            }

            let generation = state.oldest;
            let (evicted, relinked) = state.retire_oldest();
            tracing::trace!(generation, evicted, relinked, "retired age bucket");
            over -= evicted as i64;
            report.retired += 1;
            report.evicted += evicted;
            report.relinked += relinked;
        }

        let next = state.current + 1;
        state.open_bucket(now, next);
        self.restart_slice(now);

        if state.total.saturating_sub(state.live()) > config.capacity {
            let dead = state.total - state.live();
            let entries = hooks.rebuild_indexes(state)?;
            tracing::debug!(dead, entries, "rebuilt indexes");
            state.total = state.live();
            report.rebuilt = true;
            #[cfg(feature = "metrics")]
            self.metrics.record_rebuild();
        }

        if report.retired > 0 {
            tracing::debug!(
                retired = report.retired,
                evicted = report.evicted,
                relinked = report.relinked,
                live = state.live(),
                generation = state.current,
                "cleaned up generation ring"
            );
        }
        #[cfg(feature = "metrics")]
        {
            self.metrics.record_cleanup();
            self.metrics.record_evictions(report.evicted as u64);
        }
        Ok(report)
    }
}

impl<V> fmt::Debug for GenerationRing<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationRing")
            .field("config", &self.config)
            .field("current_size", &self.current_size.load(Ordering::Relaxed))
            .field("has_validity", &self.validity.is_some())
            .finish_non_exhaustive()
    }
}

#[inline]
fn nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
