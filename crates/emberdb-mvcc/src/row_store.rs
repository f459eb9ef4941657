//! Narrow view of the physical row store.
//!
//! The journal and rid-cache layer never mutates authoritative rows. It reads
//! cells, checks tombstones and pins slot layout with the root lock; that is
//! all [`RowStore`] exposes.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use emberdb_error::{EmberError, Result};
use emberdb_types::{ColumnIdx, RowIndex, Value};
use parking_lot::RwLock;

/// Row store collaborator consumed by the rid cache.
pub trait RowStore: Send + Sync {
    /// Number of physical row slots, deleted ones included.
    fn raw_row_count(&self) -> u32;

    /// Whether the slot holds a deleted row.
    fn is_row_deleted(&self, row: RowIndex) -> Result<bool>;

    /// Read one comparable cell.
    fn read_cell(&self, column: ColumnIdx, row: RowIndex) -> Result<Value>;

    /// Forbid compaction and slot reuse until the matching release.
    ///
    /// Does not block logical reads or appends. Calls nest.
    fn acquire_root_lock(&self);

    fn release_root_lock(&self);

    fn is_table_closed(&self) -> bool;
}

/// Scoped root lock: released on drop, whatever path leaves the scope.
#[must_use = "the root lock is released as soon as the guard is dropped"]
pub struct RootLockGuard<'a> {
    store: &'a dyn RowStore,
}

impl<'a> RootLockGuard<'a> {
    pub fn acquire(store: &'a dyn RowStore) -> Self {
        store.acquire_root_lock();
        Self { store }
    }
}

impl Drop for RootLockGuard<'_> {
    fn drop(&mut self) {
        self.store.release_root_lock();
    }
}

impl std::fmt::Debug for RootLockGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootLockGuard").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// MemRowStore
// ---------------------------------------------------------------------------

/// In-memory row store: a dense vector of slots, `None` for deleted rows.
///
/// Used by embedders that keep small tables entirely in memory, and by the
/// test suites. Slots are never reused while the root lock is held;
/// [`MemRowStore::compact`] refuses to run in that case.
#[derive(Debug, Default)]
pub struct MemRowStore {
    rows: RwLock<Vec<Option<Vec<Value>>>>,
    closed: AtomicBool,
    root_lock_depth: AtomicU32,
    failing_row: RwLock<Option<RowIndex>>,
}

impl MemRowStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-column store seeded with `values` at rows `0..n`.
    #[must_use]
    pub fn with_column(values: impl IntoIterator<Item = Value>) -> Self {
        let store = Self::new();
        {
            let mut rows = store.rows.write();
            rows.extend(values.into_iter().map(|v| Some(vec![v])));
        }
        store
    }

    /// Append a row and return its slot.
    pub fn append_row(&self, cells: Vec<Value>) -> RowIndex {
        let mut rows = self.rows.write();
        let row = RowIndex::new(u32::try_from(rows.len()).unwrap_or(u32::MAX));
        rows.push(Some(cells));
        row
    }

    /// Put a row into `row`, growing the slot vector with tombstones if needed.
    pub fn put_row(&self, row: RowIndex, cells: Vec<Value>) {
        let mut rows = self.rows.write();
        let idx = row.as_usize();
        if rows.len() <= idx {
            rows.resize_with(idx + 1, || None);
        }
        rows[idx] = Some(cells);
    }

    /// Tombstone a row. Returns `false` if it was already deleted or absent.
    pub fn delete_row(&self, row: RowIndex) -> bool {
        self.rows
            .write()
            .get_mut(row.as_usize())
            .and_then(Option::take)
            .is_some()
    }

    /// Drop trailing tombstones. Refused while the root lock is held.
    pub fn compact(&self) -> Result<usize> {
        if self.root_lock_depth() > 0 {
            return Err(EmberError::protocol("compaction while root lock is held"));
        }
        let mut rows = self.rows.write();
        let before = rows.len();
        while matches!(rows.last(), Some(None)) {
            rows.pop();
        }
        Ok(before - rows.len())
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn root_lock_depth(&self) -> u32 {
        self.root_lock_depth.load(Ordering::Acquire)
    }

    /// Make every read of `row` fail until cleared (tests).
    pub fn fail_reads_at(&self, row: Option<RowIndex>) {
        *self.failing_row.write() = row;
    }

    fn check_failure(&self, row: RowIndex) -> Result<()> {
        if *self.failing_row.read() == Some(row) {
            return Err(EmberError::row_store(format!("injected read failure at {row}")));
        }
        Ok(())
    }
}

impl RowStore for MemRowStore {
    fn raw_row_count(&self) -> u32 {
        u32::try_from(self.rows.read().len()).unwrap_or(u32::MAX)
    }

    fn is_row_deleted(&self, row: RowIndex) -> Result<bool> {
        self.check_failure(row)?;
        let rows = self.rows.read();
        match rows.get(row.as_usize()) {
            Some(slot) => Ok(slot.is_none()),
            None => Err(EmberError::NoSuchRow { row: row.get() }),
        }
    }

    fn read_cell(&self, column: ColumnIdx, row: RowIndex) -> Result<Value> {
        self.check_failure(row)?;
        let rows = self.rows.read();
        let cells = rows
            .get(row.as_usize())
            .and_then(Option::as_ref)
            .ok_or(EmberError::NoSuchRow { row: row.get() })?;
        cells.get(column.as_usize()).cloned().ok_or_else(|| {
            EmberError::row_store(format!("column {} out of range for {row}", column.get()))
        })
    }

    fn acquire_root_lock(&self) {
        self.root_lock_depth.fetch_add(1, Ordering::AcqRel);
    }

    fn release_root_lock(&self) {
        let prev = self.root_lock_depth.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "root lock released without being held");
    }

    fn is_table_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
