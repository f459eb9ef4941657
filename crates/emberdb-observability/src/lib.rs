//! Diagnostics for the journal and rid-cache layer.
//!
//! Provides the event types, observer trait and aggregated counters that the
//! MVCC crate emits into. Observation is opt-in: with no observer registered
//! nothing but a few relaxed atomic increments happen, and correctness never
//! depends on an observer being present.
//!
//! Observers MUST NOT block. They are called while the emitting thread may
//! hold a table's journal lock or a cache's internal lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use emberdb_types::{ColumnIdx, CommitSeq, TableId};
use parking_lot::Mutex;
use serde::Serialize;

// ---------------------------------------------------------------------------
// SubsystemEvent
// ---------------------------------------------------------------------------

/// Why a rid-cache build stopped before reaching `Built`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BuildAbortReason {
    /// The owning table closed while the build was running.
    TableClosed,
    /// The row store failed to serve a read.
    RowStoreFailure,
    /// An internal structure turned out to be inconsistent.
    Corruption,
}

/// A single diagnostics event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SubsystemEvent {
    /// A merge pass retired journals from a table's pending list.
    JournalsMerged {
        table: TableId,
        /// Journals retired in this pass (the batch size).
        merged: usize,
        /// Journals still pending after the pass.
        remaining: usize,
        /// Exclusive commit boundary the pass merged up to.
        through: CommitSeq,
    },
    /// A rid cache finished building.
    RidCacheBuilt {
        table: TableId,
        column: ColumnIdx,
        /// Index entries after the pending queue was replayed.
        entries: usize,
        /// Queued operations applied during replay.
        replayed: usize,
        hash_rid_difference: i64,
    },
    /// A rid cache ran out of headroom and re-spaced every rid.
    RidRehash {
        table: TableId,
        column: ColumnIdx,
        entries: usize,
        hash_rid_difference: i64,
    },
    /// A rid cache build gave up and returned to `NotBuilt`.
    RidBuildAborted {
        table: TableId,
        column: ColumnIdx,
        reason: BuildAbortReason,
    },
}

impl SubsystemEvent {
    /// Table the event belongs to.
    #[must_use]
    pub const fn table(&self) -> TableId {
        match self {
            Self::JournalsMerged { table, .. }
            | Self::RidCacheBuilt { table, .. }
            | Self::RidRehash { table, .. }
            | Self::RidBuildAborted { table, .. } => *table,
        }
    }
}

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

/// Receives diagnostics events. Implementations MUST be non-blocking.
pub trait SubsystemObserver: Send + Sync {
    fn on_event(&self, event: &SubsystemEvent);
}

/// Observer that discards everything.
#[derive(Debug, Clone, Copy)]
pub struct NoOpObserver;

impl SubsystemObserver for NoOpObserver {
    #[inline(always)]
    fn on_event(&self, _event: &SubsystemEvent) {}
}

// ---------------------------------------------------------------------------
// SubsystemMetrics
// ---------------------------------------------------------------------------

/// Process-wide counters, updated by every emitter regardless of observers.
pub static GLOBAL_SUBSYSTEM_METRICS: SubsystemMetrics = SubsystemMetrics::new();

/// Atomic counters for merges, rehashes and cache builds.
#[derive(Debug)]
pub struct SubsystemMetrics {
    /// Merge passes that retired at least one journal.
    pub merges_total: AtomicU64,
    /// Journals retired across all merge passes.
    pub journals_merged_total: AtomicU64,
    /// Rid rehashes.
    pub rehash_total: AtomicU64,
    /// Rid caches that reached `Built`.
    pub caches_built_total: AtomicU64,
    /// Sum of entry counts of built caches at build time.
    pub cache_entries_built_total: AtomicU64,
    /// Builds that were abandoned.
    pub build_aborts_total: AtomicU64,
}

impl SubsystemMetrics {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            merges_total: AtomicU64::new(0),
            journals_merged_total: AtomicU64::new(0),
            rehash_total: AtomicU64::new(0),
            caches_built_total: AtomicU64::new(0),
            cache_entries_built_total: AtomicU64::new(0),
            build_aborts_total: AtomicU64::new(0),
        }
    }

    /// Fold one event into the counters.
    pub fn record(&self, event: &SubsystemEvent) {
        match event {
            SubsystemEvent::JournalsMerged { merged, .. } => {
                if *merged > 0 {
                    self.merges_total.fetch_add(1, Ordering::Relaxed);
                    self.journals_merged_total
                        .fetch_add(*merged as u64, Ordering::Relaxed);
                }
            }
            SubsystemEvent::RidCacheBuilt { entries, .. } => {
                self.caches_built_total.fetch_add(1, Ordering::Relaxed);
                self.cache_entries_built_total
                    .fetch_add(*entries as u64, Ordering::Relaxed);
            }
            SubsystemEvent::RidRehash { .. } => {
                self.rehash_total.fetch_add(1, Ordering::Relaxed);
            }
            SubsystemEvent::RidBuildAborted { .. } => {
                self.build_aborts_total.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Take a point-in-time snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> SubsystemMetricsSnapshot {
        SubsystemMetricsSnapshot {
            merges_total: self.merges_total.load(Ordering::Relaxed),
            journals_merged_total: self.journals_merged_total.load(Ordering::Relaxed),
            rehash_total: self.rehash_total.load(Ordering::Relaxed),
            caches_built_total: self.caches_built_total.load(Ordering::Relaxed),
            cache_entries_built_total: self.cache_entries_built_total.load(Ordering::Relaxed),
            build_aborts_total: self.build_aborts_total.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero (tests/diagnostics).
    pub fn reset(&self) {
        self.merges_total.store(0, Ordering::Relaxed);
        self.journals_merged_total.store(0, Ordering::Relaxed);
        self.rehash_total.store(0, Ordering::Relaxed);
        self.caches_built_total.store(0, Ordering::Relaxed);
        self.cache_entries_built_total.store(0, Ordering::Relaxed);
        self.build_aborts_total.store(0, Ordering::Relaxed);
    }
}

impl Default for SubsystemMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable copy of [`SubsystemMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SubsystemMetricsSnapshot {
    pub merges_total: u64,
    pub journals_merged_total: u64,
    pub rehash_total: u64,
    pub caches_built_total: u64,
    pub cache_entries_built_total: u64,
    pub build_aborts_total: u64,
}

impl SubsystemMetricsSnapshot {
    /// Mean number of journals retired per merge pass.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn avg_merge_batch_size(&self) -> f64 {
        if self.merges_total == 0 {
            return 0.0;
        }
        self.journals_merged_total as f64 / self.merges_total as f64
    }

    /// Mean entry count of built caches.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn avg_built_cache_size(&self) -> f64 {
        if self.caches_built_total == 0 {
            return 0.0;
        }
        self.cache_entries_built_total as f64 / self.caches_built_total as f64
    }
}

// ---------------------------------------------------------------------------
// MetricsObserver
// ---------------------------------------------------------------------------

/// Default number of recent events kept by [`MetricsObserver`].
pub const DEFAULT_RECENT_EVENTS: usize = 256;

/// Observer that aggregates counters and keeps a bounded tail of events.
///
/// Unlike the global counters, a `MetricsObserver` is scoped to whatever it
/// was registered on (usually one table).
#[derive(Debug)]
pub struct MetricsObserver {
    metrics: SubsystemMetrics,
    recent: Mutex<VecDeque<SubsystemEvent>>,
    capacity: usize,
}

impl MetricsObserver {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            metrics: SubsystemMetrics::new(),
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    #[must_use]
    pub fn metrics(&self) -> SubsystemMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Recent events, oldest first.
    #[must_use]
    pub fn recent_events(&self) -> Vec<SubsystemEvent> {
        self.recent.lock().iter().cloned().collect()
    }

    pub fn reset(&self) {
        self.metrics.reset();
        self.recent.lock().clear();
    }
}

impl Default for MetricsObserver {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_EVENTS)
    }
}

impl SubsystemObserver for MetricsObserver {
    fn on_event(&self, event: &SubsystemEvent) {
        self.metrics.record(event);
        if self.capacity == 0 {
            return;
        }
        let mut recent = self.recent.lock();
        if recent.len() == self.capacity {
            recent.pop_front();
        }
        recent.push_back(event.clone());
    }
}
