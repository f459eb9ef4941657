//! Per-column rid cache.
//!
//! An [`OrderedRowCache`] maps every live row of a table to a synthetic
//! integer, its *rid*, such that comparing two rids gives the same answer as
//! comparing the rows' values in one column. Sort and range code can then
//! order rows without calling the value comparator.
//!
//! Rids are spaced `hash_rid_difference` apart when the cache is built. A
//! later insert takes the midpoint between its neighbours; when two
//! neighbours end up adjacent the whole index is re-spaced (a *rehash*).
//!
//! ## Lifecycle
//!
//! ```text
//! NotBuilt -> BuildingIndex -> BuildingRids -> ReplayingPending -> Built
//! ```
//!
//! The build runs off the critical path, on whatever thread the
//! [`BuildScheduler`] picks. Writers never wait for it: while a build is in
//! progress [`insert`](OrderedRowCache::insert) and
//! [`remove`](OrderedRowCache::remove) only append to a pending queue, which
//! the build drains before it publishes `Built`. A failed build returns the
//! cache to `NotBuilt` and drops the queue. `Built` is terminal: a corruption
//! error after that poisons the cache instead of rebuilding it.
//!
//! ## Locking
//!
//! Two internal mutexes, never held together:
//! - the control lock guards the state, the scheduled flag and the queue;
//! - the structure lock guards the index and rid slots, which the build
//!   installs on entering `ReplayingPending`.
//!
//! Callers of `insert`/`remove` additionally hold the table's row-mutation
//! lock (see [`TableRuntime`](crate::TableRuntime)); the build does not.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use emberdb_error::{EmberError, Result};
use emberdb_observability::{BuildAbortReason, SubsystemEvent};
use emberdb_types::{ColumnIdx, Rid, RowIndex, TableId, Value};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::RidCacheConfig;
use crate::observability::{SharedObserver, emit};
use crate::ordered_index::{IndexEntry, OrderedIndex};
use crate::row_store::{RootLockGuard, RowStore};
use crate::scheduler::BuildScheduler;

/// Rows scanned between two table-closed checks during a build.
pub const CLOSE_CHECK_INTERVAL: u32 = 1_024;

// ---------------------------------------------------------------------------
// Build state
// ---------------------------------------------------------------------------

/// Build lifecycle of an [`OrderedRowCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildState {
    NotBuilt,
    /// Scanning the table into the value-ordered index.
    BuildingIndex,
    /// Root lock held, assigning initial rids.
    BuildingRids,
    /// Applying operations queued during the build.
    ReplayingPending,
    /// Terminal. Inserts and removes apply directly.
    Built,
}

impl BuildState {
    /// Whether writes are queued rather than applied or ignored.
    #[must_use]
    pub const fn is_building(self) -> bool {
        matches!(
            self,
            Self::BuildingIndex | Self::BuildingRids | Self::ReplayingPending
        )
    }
}

/// Result of a [`OrderedRowCache::build`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    Built {
        /// Index entries right after the queue drained.
        entries: usize,
        /// Queued operations applied during replay.
        replayed: usize,
        hash_rid_difference: i64,
    },
    /// The cache was not `NotBuilt`; nothing happened.
    Skipped(BuildState),
}

#[derive(Debug, Clone)]
enum PendingOp {
    Insert { row: RowIndex, value: Value },
    /// Value captured when the remove was requested.
    Remove { row: RowIndex, value: Value },
}

#[derive(Debug)]
struct Control {
    state: BuildState,
    scheduled: bool,
    pending: VecDeque<PendingOp>,
}

// ---------------------------------------------------------------------------
// Rid structures
// ---------------------------------------------------------------------------

/// Rid slot of one physical row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RidSlot {
    Empty,
    /// Being placed by an in-flight insert.
    Provisional,
    Live(Rid),
    /// Left behind by a remove. Never read; overwritten by the next insert.
    Stale(Rid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Midpoint,
    SharedWithPredecessor,
    Rehashed,
}

#[derive(Debug)]
struct RidStructures {
    index: OrderedIndex,
    slots: Vec<RidSlot>,
    gap: i64,
    /// Set by a corruption error in a built cache. Every later operation
    /// fails until the table closes.
    poisoned: bool,
}

impl RidStructures {
    fn new(index: OrderedIndex, slot_count: usize, gap: i64) -> Self {
        Self {
            index,
            slots: vec![RidSlot::Empty; slot_count],
            gap,
            poisoned: false,
        }
    }

    fn slot(&self, row: RowIndex) -> RidSlot {
        self.slots
            .get(row.as_usize())
            .copied()
            .unwrap_or(RidSlot::Empty)
    }

    fn set_slot(&mut self, row: RowIndex, slot: RidSlot) {
        set_slot(&mut self.slots, row, slot);
    }

    fn live_rid(&self, row: RowIndex) -> Option<Rid> {
        match self.slot(row) {
            RidSlot::Live(rid) => Some(rid),
            RidSlot::Empty | RidSlot::Provisional | RidSlot::Stale(_) => None,
        }
    }

    /// Rid of the indexed entry at `pos`.
    fn rid_at(&self, pos: usize) -> Result<i64> {
        let row = self
            .index
            .get(pos)
            .map(|e| e.row)
            .ok_or_else(|| EmberError::internal(format!("no index entry at position {pos}")))?;
        self.live_rid(row)
            .map(Rid::get)
            .ok_or_else(|| EmberError::internal(format!("indexed {row} has no rid")))
    }

    /// Re-space every rid using a gap computed from the current size.
    fn rehash(&mut self, config: RidCacheConfig) -> Result<()> {
        self.gap = config.hash_rid_difference(self.index.len());
        assign_rids(&self.index, &mut self.slots, self.gap)
    }

    /// Put `(value, row)` into the index and give `row` a rid.
    fn place(&mut self, config: RidCacheConfig, value: Value, row: RowIndex) -> Result<Placement> {
        if matches!(self.slot(row), RidSlot::Live(_)) {
            // Seen by both the build scan and the pending queue.
            if let Some(pos) = self.index.position_of_row(row) {
                self.index.remove_at(pos);
            }
        }
        self.set_slot(row, RidSlot::Provisional);
        let pos = self.index.insert_after_equals(value, row);

        let prev_rid = match pos.checked_sub(1) {
            None => 0,
            Some(prev) => {
                let prev_rid = self.rid_at(prev)?;
                let equal = matches!(
                    (self.index.get(prev), self.index.get(pos)),
                    (Some(a), Some(b)) if a.value == b.value
                );
                if equal {
                    self.set_slot(row, RidSlot::Live(Rid::new(prev_rid)));
                    return Ok(Placement::SharedWithPredecessor);
                }
                prev_rid
            }
        };
        let next_rid = if pos + 1 < self.index.len() {
            self.rid_at(pos + 1)?
        } else {
            prev_rid + 2 * self.gap
        };

        if prev_rid >= next_rid {
            error!(
                position = pos,
                prev_rid, next_rid, "rid neighbours out of order"
            );
            return Err(EmberError::IndexUnsorted { position: pos });
        }
        if prev_rid + 1 == next_rid {
            self.rehash(config)?;
            if self.live_rid(row).is_none() {
                return Err(EmberError::RehashFailed { row: row.get() });
            }
            return Ok(Placement::Rehashed);
        }

        let rid = ((next_rid + 1) + (prev_rid - 1)) / 2;
        self.set_slot(row, RidSlot::Live(Rid::new(rid)));
        Ok(Placement::Midpoint)
    }

    /// Drop `row` from the index. Its rid slot is left stale.
    fn unplace(&mut self, value: &Value, row: RowIndex) -> bool {
        let Some(pos) = self.index.position_of(value, row) else {
            return false;
        };
        self.index.remove_at(pos);
        if let RidSlot::Live(rid) = self.slot(row) {
            self.set_slot(row, RidSlot::Stale(rid));
        }
        true
    }
}

fn poisoned(table: TableId, column: ColumnIdx) -> EmberError {
    EmberError::internal(format!(
        "rid cache for {table} column {} is poisoned by an earlier corruption error",
        column.get()
    ))
}

fn set_slot(slots: &mut Vec<RidSlot>, row: RowIndex, slot: RidSlot) {
    let idx = row.as_usize();
    if slots.len() <= idx {
        slots.resize(idx + 1, RidSlot::Empty);
    }
    slots[idx] = slot;
}

/// Walk the index in order: the first entry gets `gap`, a greater value gets
/// the previous rid plus `gap`, an equal value shares the previous rid.
fn assign_rids(index: &OrderedIndex, slots: &mut Vec<RidSlot>, gap: i64) -> Result<()> {
    let mut prev: Option<(&Value, i64)> = None;
    for (pos, entry) in index.iter().enumerate() {
        let rid = match prev {
            None => gap,
            Some((prev_value, prev_rid)) => match entry.value.cmp(prev_value) {
                Ordering::Greater => prev_rid + gap,
                Ordering::Equal => prev_rid,
                Ordering::Less => {
                    error!(position = pos, "value-ordered index is not sorted");
                    return Err(EmberError::IndexUnsorted { position: pos });
                }
            },
        };
        set_slot(slots, entry.row, RidSlot::Live(Rid::new(rid)));
        prev = Some((&entry.value, rid));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Scheduled build
// ---------------------------------------------------------------------------

/// Build request owned by the scheduler. Dropping it unrun clears the
/// cache's scheduled flag so a later request is accepted.
struct ScheduledBuild {
    cache: Weak<OrderedRowCache>,
    started: bool,
}

impl ScheduledBuild {
    fn run(mut self) {
        self.started = true;
        if let Some(cache) = self.cache.upgrade() {
            if let Err(err) = cache.build() {
                debug!(error = %err, "deferred rid cache build failed");
            }
        }
    }
}

impl Drop for ScheduledBuild {
    fn drop(&mut self) {
        if self.started {
            return;
        }
        if let Some(cache) = self.cache.upgrade() {
            cache.cancel_scheduled();
        }
    }
}

// ---------------------------------------------------------------------------
// OrderedRowCache
// ---------------------------------------------------------------------------

/// Rid cache for one column of one table.
pub struct OrderedRowCache {
    table: TableId,
    column: ColumnIdx,
    store: Arc<dyn RowStore>,
    scheduler: Arc<dyn BuildScheduler>,
    config: RidCacheConfig,
    observer: SharedObserver,
    control: Mutex<Control>,
    built: Mutex<Option<RidStructures>>,
}

impl OrderedRowCache {
    #[must_use]
    pub fn new(
        table: TableId,
        column: ColumnIdx,
        store: Arc<dyn RowStore>,
        scheduler: Arc<dyn BuildScheduler>,
        config: RidCacheConfig,
    ) -> Self {
        Self {
            table,
            column,
            store,
            scheduler,
            config,
            observer: None,
            control: Mutex::new(Control {
                state: BuildState::NotBuilt,
                scheduled: false,
                pending: VecDeque::new(),
            }),
            built: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub const fn table(&self) -> TableId {
        self.table
    }

    #[must_use]
    pub const fn column(&self) -> ColumnIdx {
        self.column
    }

    #[must_use]
    pub const fn config(&self) -> RidCacheConfig {
        self.config
    }

    /// Ask the scheduler to run [`build`](Self::build) after the configured
    /// delay.
    ///
    /// Does nothing, and returns `false`, unless the cache is `NotBuilt` and
    /// no build is already scheduled. The scheduled task holds only a weak
    /// reference: a cache dropped before the task runs is not built. If the
    /// scheduler drops the task without running it, the request is
    /// withdrawn and anything queued for it is discarded.
    pub fn schedule_build(self: &Arc<Self>) -> bool {
        {
            let mut control = self.control.lock();
            if control.state != BuildState::NotBuilt || control.scheduled {
                return false;
            }
            control.scheduled = true;
        }
        let delay = self.config.build_delay();
        debug!(
            table = self.table.get(),
            column = self.column.get(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "rid cache build scheduled"
        );
        let task = ScheduledBuild {
            cache: Arc::downgrade(self),
            started: false,
        };
        self.scheduler.schedule_after(delay, Box::new(move || task.run()));
        true
    }

    /// Undo [`schedule_build`](Self::schedule_build) for a task the scheduler
    /// dropped without running.
    fn cancel_scheduled(&self) {
        let discarded = {
            let mut control = self.control.lock();
            if control.state != BuildState::NotBuilt || !control.scheduled {
                return;
            }
            control.scheduled = false;
            let discarded = control.pending.len();
            control.pending.clear();
            discarded
        };
        warn!(
            table = self.table.get(),
            column = self.column.get(),
            discarded,
            "scheduled rid cache build dropped before running"
        );
    }

    /// Build the cache now.
    ///
    /// Returns [`BuildOutcome::Skipped`] if the cache is not `NotBuilt`.
    ///
    /// # Errors
    ///
    /// [`EmberError::TableClosed`] if the table closed mid-build, a row-store
    /// error from the scan, or a corruption error from rid assignment or
    /// replay. In every case the cache is back to `NotBuilt` with an empty
    /// queue, and the root lock has been released.
    pub fn build(&self) -> Result<BuildOutcome> {
        {
            let mut control = self.control.lock();
            if control.state != BuildState::NotBuilt {
                debug!(
                    table = self.table.get(),
                    column = self.column.get(),
                    state = ?control.state,
                    "rid cache build skipped"
                );
                return Ok(BuildOutcome::Skipped(control.state));
            }
            control.state = BuildState::BuildingIndex;
        }
        self.run_build().inspect_err(|err| self.tear_down(err))
    }

    fn run_build(&self) -> Result<BuildOutcome> {
        let entries = self.scan_rows()?;

        let (gap, mut replayed) = {
            let _root = RootLockGuard::acquire(self.store.as_ref());
            self.set_state(BuildState::BuildingRids);
            let index = OrderedIndex::from_scan(entries);
            let gap = self.config.hash_rid_difference(index.len());
            let slot_count = self.store.raw_row_count() as usize;
            let mut structures = RidStructures::new(index, slot_count, gap);
            assign_rids(&structures.index, &mut structures.slots, gap)?;

            *self.built.lock() = Some(structures);
            self.set_state(BuildState::ReplayingPending);
            (gap, self.replay_pending()?)
        };
        // Root lock released; writes queued since then land before `Built`.
        replayed += self.publish_built()?;

        let (entries, hash_rid_difference) = self
            .built
            .lock()
            .as_ref()
            .map_or((0, gap), |s| (s.index.len(), s.gap));
        info!(
            table = self.table.get(),
            column = self.column.get(),
            entries,
            replayed,
            hash_rid_difference,
            "rid cache built"
        );
        emit(
            &self.observer,
            &SubsystemEvent::RidCacheBuilt {
                table: self.table,
                column: self.column,
                entries,
                replayed,
                hash_rid_difference,
            },
        );
        Ok(BuildOutcome::Built {
            entries,
            replayed,
            hash_rid_difference,
        })
    }

    /// Read every live row once, in row order.
    fn scan_rows(&self) -> Result<Vec<IndexEntry>> {
        if self.store.is_table_closed() {
            return Err(EmberError::TableClosed);
        }
        let count = self.store.raw_row_count();
        let mut entries = Vec::with_capacity(count as usize);
        for raw in 0..count {
            if raw > 0 && raw % CLOSE_CHECK_INTERVAL == 0 && self.store.is_table_closed() {
                return Err(EmberError::TableClosed);
            }
            let row = RowIndex::new(raw);
            if self.store.is_row_deleted(row)? {
                continue;
            }
            match self.store.read_cell(self.column, row) {
                Ok(value) => entries.push(IndexEntry { value, row }),
                Err(EmberError::NoSuchRow { .. }) => {
                    // Deleted between the tombstone check and the read.
                    warn!(table = self.table.get(), row = raw, "row vanished during rid cache scan");
                }
                Err(err) => return Err(err),
            }
        }
        debug!(
            table = self.table.get(),
            column = self.column.get(),
            scanned = count,
            live = entries.len(),
            "rid cache scan complete"
        );
        Ok(entries)
    }

    /// Publish `Built` once the queue is observed empty under the control
    /// lock, replaying whatever is still queued first.
    fn publish_built(&self) -> Result<usize> {
        let mut replayed = 0;
        loop {
            {
                let mut control = self.control.lock();
                if control.pending.is_empty() {
                    control.state = BuildState::Built;
                    control.scheduled = false;
                    return Ok(replayed);
                }
            }
            replayed += self.replay_pending()?;
        }
    }

    /// Apply queued operations in arrival order until the queue is empty.
    fn replay_pending(&self) -> Result<usize> {
        let mut replayed = 0;
        loop {
            let batch = {
                let mut control = self.control.lock();
                if control.pending.is_empty() {
                    return Ok(replayed);
                }
                std::mem::take(&mut control.pending)
            };
            let mut built = self.built.lock();
            let structures = built
                .as_mut()
                .ok_or_else(|| EmberError::internal("rid structures missing during replay"))?;
            for op in batch {
                replayed += 1;
                match op {
                    PendingOp::Insert { row, value } => self.place(structures, value, row)?,
                    PendingOp::Remove { row, value } => {
                        warn!(
                            table = self.table.get(),
                            column = self.column.get(),
                            row = row.get(),
                            "row removed while rid cache was building"
                        );
                        structures.unplace(&value, row);
                    }
                }
            }
        }
    }

    fn place(&self, structures: &mut RidStructures, value: Value, row: RowIndex) -> Result<()> {
        if structures.place(self.config, value, row)? == Placement::Rehashed {
            debug!(
                table = self.table.get(),
                column = self.column.get(),
                entries = structures.index.len(),
                gap = structures.gap,
                "rid rehash"
            );
            emit(
                &self.observer,
                &SubsystemEvent::RidRehash {
                    table: self.table,
                    column: self.column,
                    entries: structures.index.len(),
                    hash_rid_difference: structures.gap,
                },
            );
        }
        Ok(())
    }

    fn set_state(&self, state: BuildState) {
        self.control.lock().state = state;
    }

    /// Return to `NotBuilt` after a failed build.
    fn tear_down(&self, err: &EmberError) {
        let reason = match err {
            EmberError::TableClosed => BuildAbortReason::TableClosed,
            e if e.is_corruption() => BuildAbortReason::Corruption,
            _ => BuildAbortReason::RowStoreFailure,
        };
        // Structures first: a new build may start as soon as the state flips.
        *self.built.lock() = None;
        let discarded = {
            let mut control = self.control.lock();
            control.state = BuildState::NotBuilt;
            control.scheduled = false;
            let discarded = control.pending.len();
            control.pending.clear();
            discarded
        };
        match reason {
            BuildAbortReason::TableClosed => info!(
                table = self.table.get(),
                column = self.column.get(),
                discarded,
                "rid cache build abandoned: table closed"
            ),
            BuildAbortReason::RowStoreFailure => warn!(
                table = self.table.get(),
                column = self.column.get(),
                discarded,
                error = %err,
                "rid cache build failed"
            ),
            BuildAbortReason::Corruption => error!(
                table = self.table.get(),
                column = self.column.get(),
                discarded,
                error = %err,
                "rid cache corrupt, dropped"
            ),
        }
        emit(
            &self.observer,
            &SubsystemEvent::RidBuildAborted {
                table: self.table,
                column: self.column,
                reason,
            },
        );
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Record that `row` now holds `value`.
    ///
    /// The caller holds the table's row-mutation lock. Ignored while
    /// `NotBuilt`, queued while building.
    ///
    /// # Errors
    ///
    /// [`EmberError::IndexUnsorted`] or [`EmberError::RehashFailed`] if the
    /// built structures are inconsistent. The cache stays `Built` but is
    /// poisoned, and every later call fails with [`EmberError::Internal`].
    pub fn insert(&self, value: Value, row: RowIndex) -> Result<()> {
        {
            let mut control = self.control.lock();
            match control.state {
                BuildState::NotBuilt => return Ok(()),
                BuildState::BuildingIndex
                | BuildState::BuildingRids
                | BuildState::ReplayingPending => {
                    control.pending.push_back(PendingOp::Insert { row, value });
                    return Ok(());
                }
                BuildState::Built => {}
            }
        }
        self.apply_built(|s| self.place(s, value, row))
    }

    /// Record that `row` is about to be removed from the table.
    ///
    /// Reads the row's current value from the store, so it must run before
    /// the physical delete. Same locking contract as [`insert`](Self::insert).
    /// The row's rid slot is left stale, not cleared.
    ///
    /// Also queued while a build is scheduled but not started: that build
    /// may scan the row before the delete lands.
    ///
    /// # Errors
    ///
    /// Row-store errors from reading the value, or [`EmberError::Internal`]
    /// if the cache is poisoned.
    pub fn remove(&self, row: RowIndex) -> Result<()> {
        {
            let control = self.control.lock();
            if control.state == BuildState::NotBuilt && !control.scheduled {
                return Ok(());
            }
        }
        let value = self.store.read_cell(self.column, row)?;
        {
            let mut control = self.control.lock();
            match (control.state, control.scheduled) {
                (BuildState::NotBuilt, false) => return Ok(()),
                (BuildState::NotBuilt, true)
                | (
                    BuildState::BuildingIndex
                    | BuildState::BuildingRids
                    | BuildState::ReplayingPending,
                    _,
                ) => {
                    control.pending.push_back(PendingOp::Remove { row, value });
                    return Ok(());
                }
                (BuildState::Built, _) => {}
            }
        }
        self.apply_built(|s| {
            if !s.unplace(&value, row) {
                warn!(
                    table = self.table.get(),
                    column = self.column.get(),
                    row = row.get(),
                    "removed row was not in the rid cache"
                );
            }
            Ok(())
        })
    }

    fn apply_built(&self, op: impl FnOnce(&mut RidStructures) -> Result<()>) -> Result<()> {
        let mut built = self.built.lock();
        let structures = built
            .as_mut()
            .ok_or_else(|| EmberError::internal("built rid cache has no structures"))?;
        if structures.poisoned {
            return Err(poisoned(self.table, self.column));
        }
        let result = op(&mut *structures);
        if let Err(err) = &result {
            if err.is_corruption() {
                structures.poisoned = true;
                error!(
                    table = self.table.get(),
                    column = self.column.get(),
                    error = %err,
                    "rid cache corrupt, poisoned"
                );
            }
        }
        result
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn state(&self) -> BuildState {
        self.control.lock().state
    }

    #[must_use]
    pub fn is_built(&self) -> bool {
        self.state() == BuildState::Built
    }

    /// Operations queued by an in-progress build.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.control.lock().pending.len()
    }

    fn read_built<R>(&self, read: impl FnOnce(&RidStructures) -> R) -> Result<R> {
        if !self.is_built() {
            return Err(EmberError::protocol("rid cache is not built"));
        }
        match self.built.lock().as_ref() {
            Some(s) if s.poisoned => Err(poisoned(self.table, self.column)),
            Some(s) => Ok(read(s)),
            None => Err(EmberError::internal("built rid cache has no structures")),
        }
    }

    /// Whether a corruption error has disabled this built cache.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.built.lock().as_ref().is_some_and(|s| s.poisoned)
    }

    /// Indexed rows; zero unless built and healthy.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_built(|s| s.index.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current rid spacing, once built.
    #[must_use]
    pub fn hash_rid_difference(&self) -> Option<i64> {
        self.read_built(|s| s.gap).ok()
    }

    /// Rid of an indexed row.
    #[must_use]
    pub fn rid(&self, row: RowIndex) -> Option<Rid> {
        self.read_built(|s| s.live_rid(row)).ok().flatten()
    }

    /// Compare two rows by column value using only their rids.
    ///
    /// # Errors
    ///
    /// [`EmberError::ProtocolViolation`] if the cache is not built,
    /// [`EmberError::Internal`] if it is poisoned,
    /// [`EmberError::NoSuchRow`] if either row is not indexed.
    pub fn compare_rows(&self, a: RowIndex, b: RowIndex) -> Result<Ordering> {
        self.read_built(|s| {
            let rid_a = s.live_rid(a).ok_or(EmberError::NoSuchRow { row: a.get() })?;
            let rid_b = s.live_rid(b).ok_or(EmberError::NoSuchRow { row: b.get() })?;
            Ok(rid_a.cmp(&rid_b))
        })?
    }

    /// Indexed rows in value order.
    #[must_use]
    pub fn ordered_rows(&self) -> Option<Vec<RowIndex>> {
        self.read_built(|s| s.index.iter().map(|e| e.row).collect())
            .ok()
    }

    /// Row at index position `pos`.
    #[must_use]
    pub fn row_at(&self, pos: usize) -> Option<RowIndex> {
        self.read_built(|s| s.index.get(pos).map(|e| e.row))
            .ok()
            .flatten()
    }

    /// Position of the first entry not less than `value`.
    #[must_use]
    pub fn first_position(&self, value: &Value) -> Option<usize> {
        self.read_built(|s| s.index.first_position(value)).ok()
    }

    /// Position just past the last entry equal to `value`.
    #[must_use]
    pub fn last_position(&self, value: &Value) -> Option<usize> {
        self.read_built(|s| s.index.last_position(value)).ok()
    }

    /// Compare the value at index position `pos` with `value`.
    #[must_use]
    pub fn compare_at(&self, pos: usize, value: &Value) -> Option<Ordering> {
        self.read_built(|s| s.index.compare_at(pos, value))
            .ok()
            .flatten()
    }
}

impl std::fmt::Debug for OrderedRowCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let control = self.control.lock();
        f.debug_struct("OrderedRowCache")
            .field("table", &self.table)
            .field("column", &self.column)
            .field("state", &control.state)
            .field("scheduled", &control.scheduled)
            .field("pending", &control.pending.len())
            .finish_non_exhaustive()
    }
}
