//! Per-table owner of the committed journals and the rid caches.
//!
//! Row mutations go through a [`RowMutationGuard`], so every cache insert or
//! remove provably happens under the table's row-mutation lock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use emberdb_error::{EmberError, Result};
use emberdb_types::{ColumnIdx, CommitSeq, RowIndex, TableId};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::observability::SharedObserver;
use crate::rid_cache::{BuildState, OrderedRowCache};
use crate::row_store::RowStore;
use crate::scheduler::BuildScheduler;
use crate::table_journal::PerTableJournal;
use crate::versioned::{RowConflict, VersionedTableJournals};

/// Proof that the holder owns a table's row-mutation lock.
#[must_use = "the row-mutation lock is released when the guard is dropped"]
pub struct RowMutationGuard<'a> {
    runtime: &'a TableRuntime,
    _lock: MutexGuard<'a, ()>,
}

impl RowMutationGuard<'_> {
    #[must_use]
    pub const fn table(&self) -> TableId {
        self.runtime.table
    }
}

impl std::fmt::Debug for RowMutationGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowMutationGuard")
            .field("table", &self.runtime.table)
            .finish()
    }
}

/// Runtime state of one open table.
pub struct TableRuntime {
    table: TableId,
    store: Arc<dyn RowStore>,
    scheduler: Arc<dyn BuildScheduler>,
    config: EngineConfig,
    observer: SharedObserver,
    journals: VersionedTableJournals,
    caches: Mutex<BTreeMap<ColumnIdx, Arc<OrderedRowCache>>>,
    row_lock: Mutex<()>,
    closed: AtomicBool,
}

impl TableRuntime {
    #[must_use]
    pub fn new(
        table: TableId,
        store: Arc<dyn RowStore>,
        scheduler: Arc<dyn BuildScheduler>,
        config: EngineConfig,
    ) -> Self {
        Self::with_observer(table, store, scheduler, config, None)
    }

    #[must_use]
    pub fn with_observer(
        table: TableId,
        store: Arc<dyn RowStore>,
        scheduler: Arc<dyn BuildScheduler>,
        config: EngineConfig,
        observer: SharedObserver,
    ) -> Self {
        Self {
            table,
            store,
            scheduler,
            config,
            journals: VersionedTableJournals::with_observer(table, observer.clone()),
            observer,
            caches: Mutex::new(BTreeMap::new()),
            row_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn table(&self) -> TableId {
        self.table
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub const fn journals(&self) -> &VersionedTableJournals {
        &self.journals
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The rid cache for `column`, created and scheduled for build on first
    /// use. At most one cache exists per column.
    ///
    /// # Errors
    ///
    /// [`EmberError::TableClosed`] after [`close`](Self::close).
    pub fn rid_cache(&self, column: ColumnIdx) -> Result<Arc<OrderedRowCache>> {
        if self.is_closed() {
            return Err(EmberError::TableClosed);
        }
        let cache = {
            let mut caches = self.caches.lock();
            Arc::clone(caches.entry(column).or_insert_with(|| {
                debug!(
                    table = self.table.get(),
                    column = column.get(),
                    "rid cache created"
                );
                Arc::new(
                    OrderedRowCache::new(
                        self.table,
                        column,
                        Arc::clone(&self.store),
                        Arc::clone(&self.scheduler),
                        self.config.rid_cache,
                    )
                    .with_observer(self.observer.clone()),
                )
            }))
        };
        cache.schedule_build();
        Ok(cache)
    }

    /// Columns that currently have a rid cache.
    #[must_use]
    pub fn cached_columns(&self) -> Vec<ColumnIdx> {
        self.caches.lock().keys().copied().collect()
    }

    /// Take the table's row-mutation lock.
    pub fn lock_rows(&self) -> RowMutationGuard<'_> {
        RowMutationGuard {
            runtime: self,
            _lock: self.row_lock.lock(),
        }
    }

    fn check_guard(&self, guard: &RowMutationGuard<'_>) -> Result<()> {
        if std::ptr::eq(guard.runtime, self) {
            Ok(())
        } else {
            Err(EmberError::protocol(format!(
                "row-mutation lock of {} used on {}",
                guard.table(),
                self.table
            )))
        }
    }

    fn caches_snapshot(&self) -> Vec<Arc<OrderedRowCache>> {
        self.caches.lock().values().cloned().collect()
    }

    /// Tell every rid cache that `row` was written to the store.
    ///
    /// Call after the store write. Caches that are not built are skipped
    /// without reading the row; a build that starts afterwards scans it.
    ///
    /// # Errors
    ///
    /// Row-store errors reading the new value, or a cache corruption error.
    pub fn row_inserted(&self, guard: &RowMutationGuard<'_>, row: RowIndex) -> Result<()> {
        self.check_guard(guard)?;
        for cache in self.caches_snapshot() {
            if cache.state() == BuildState::NotBuilt {
                continue;
            }
            let value = self.store.read_cell(cache.column(), row)?;
            cache.insert(value, row)?;
        }
        Ok(())
    }

    /// Tell every rid cache that `row` is about to be deleted.
    ///
    /// Call before the store delete: the caches read the old value.
    ///
    /// # Errors
    ///
    /// Row-store errors reading the old value, or `Internal` from a poisoned
    /// cache.
    pub fn row_removing(&self, guard: &RowMutationGuard<'_>, row: RowIndex) -> Result<()> {
        self.check_guard(guard)?;
        for cache in self.caches_snapshot() {
            cache.remove(row)?;
        }
        Ok(())
    }

    /// Publish a committed journal for this table.
    ///
    /// # Errors
    ///
    /// See [`VersionedTableJournals::append_journal`].
    pub fn commit(&self, journal: PerTableJournal) -> Result<()> {
        self.journals.append_journal(journal)
    }

    /// See [`VersionedTableJournals::merge_up_to`].
    pub fn merge_up_to(&self, commit: CommitSeq) -> bool {
        self.journals.merge_up_to(commit)
    }

    #[must_use]
    pub fn journals_since(&self, commit: CommitSeq) -> Vec<PerTableJournal> {
        self.journals.journals_since(commit)
    }

    #[must_use]
    pub fn find_conflicts(&self, since: CommitSeq, rows: &[RowIndex]) -> Vec<RowConflict> {
        self.journals.find_conflicts(since, rows)
    }

    /// Close the table: drop every rid cache and refuse new ones.
    ///
    /// In-flight builds notice through [`RowStore::is_table_closed`]; close
    /// the store as well to stop them early.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let dropped = {
            let mut caches = self.caches.lock();
            let n = caches.len();
            caches.clear();
            n
        };
        info!(table = self.table.get(), dropped, "table runtime closed");
    }
}

impl std::fmt::Debug for TableRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableRuntime")
            .field("table", &self.table)
            .field("journals", &self.journals)
            .field("caches", &self.cached_columns())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use emberdb_types::Value;

    use super::*;
    use crate::op_journal::OperationJournal;
    use crate::row_store::MemRowStore;
    use crate::scheduler::ManualScheduler;

    const T: TableId = TableId::new(3);

    fn runtime(values: &[i64]) -> (Arc<MemRowStore>, Arc<ManualScheduler>, TableRuntime) {
        let store = Arc::new(MemRowStore::with_column(
            values.iter().map(|&v| Value::Integer(v)),
        ));
        let scheduler = Arc::new(ManualScheduler::new());
        let rt = TableRuntime::new(
            T,
            store.clone(),
            scheduler.clone(),
            EngineConfig::default(),
        );
        (store, scheduler, rt)
    }

    #[test]
    fn test_rid_cache_is_shared_per_column() {
        let (_store, scheduler, rt) = runtime(&[2, 1]);
        let a = rt.rid_cache(ColumnIdx::new(0)).unwrap();
        let b = rt.rid_cache(ColumnIdx::new(0)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(scheduler.pending(), 1, "second lookup does not reschedule");

        scheduler.run_pending();
        assert!(a.is_built());
        assert_eq!(a.ordered_rows().unwrap(), vec![RowIndex::new(1), RowIndex::new(0)]);
        assert_eq!(rt.cached_columns(), vec![ColumnIdx::new(0)]);
    }

    #[test]
    fn test_row_mutations_reach_built_cache() {
        let (store, scheduler, rt) = runtime(&[10, 30]);
        let cache = rt.rid_cache(ColumnIdx::new(0)).unwrap();
        scheduler.run_pending();

        {
            let guard = rt.lock_rows();
            let row = store.append_row(vec![Value::Integer(20)]);
            rt.row_inserted(&guard, row).unwrap();
            rt.row_removing(&guard, RowIndex::new(0)).unwrap();
            store.delete_row(RowIndex::new(0));
        }

        assert_eq!(
            cache.ordered_rows().unwrap(),
            vec![RowIndex::new(2), RowIndex::new(1)]
        );
    }

    #[test]
    fn test_unbuilt_cache_skips_insert_reads() {
        let (store, _scheduler, rt) = runtime(&[1]);
        let cache = rt.rid_cache(ColumnIdx::new(0)).unwrap();
        store.fail_reads_at(Some(RowIndex::new(0)));

        let guard = rt.lock_rows();
        rt.row_inserted(&guard, RowIndex::new(0)).unwrap();
        assert_eq!(cache.state(), BuildState::NotBuilt);
        assert_eq!(cache.pending_len(), 0);
    }

    #[test]
    fn test_remove_before_scheduled_build_is_kept() {
        let (store, scheduler, rt) = runtime(&[4, 5, 6]);
        let cache = rt.rid_cache(ColumnIdx::new(0)).unwrap();

        {
            let guard = rt.lock_rows();
            rt.row_removing(&guard, RowIndex::new(1)).unwrap();
            // Delete lands later; the build must still drop the row.
            assert_eq!(cache.pending_len(), 1);
        }
        scheduler.run_pending();
        store.delete_row(RowIndex::new(1));

        assert_eq!(
            cache.ordered_rows().unwrap(),
            vec![RowIndex::new(0), RowIndex::new(2)]
        );
    }

    #[test]
    fn test_foreign_guard_is_rejected() {
        let (_s1, _sch1, rt) = runtime(&[1]);
        let (_s2, _sch2, other) = runtime(&[1]);
        let guard = other.lock_rows();
        let err = rt.row_inserted(&guard, RowIndex::new(0)).unwrap_err();
        assert!(matches!(err, EmberError::ProtocolViolation { .. }));
    }

    #[test]
    fn test_commit_and_merge_flow() {
        let (_store, _scheduler, rt) = runtime(&[]);
        for seq in [1_u64, 2, 3] {
            let journal = OperationJournal::new();
            journal.record_row_added(T, RowIndex::new(u32::try_from(seq).unwrap()));
            journal.record_row_added(TableId::new(99), RowIndex::new(0));
            let split = journal.into_commit_split(CommitSeq::new(seq)).unwrap();
            for pt in split.table_journals {
                if pt.table() == T {
                    rt.commit(pt).unwrap();
                }
            }
        }

        assert_eq!(rt.journals_since(CommitSeq::new(2)).len(), 2);
        let conflicts = rt.find_conflicts(CommitSeq::new(2), &[RowIndex::new(3)]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].commit, CommitSeq::new(3));

        assert!(!rt.merge_up_to(CommitSeq::new(3)));
        assert_eq!(rt.journals().pending_len(), 1);
        assert!(rt.merge_up_to(CommitSeq::new(4)));
    }

    #[test]
    fn test_close_drops_caches() {
        let (_store, scheduler, rt) = runtime(&[1, 2]);
        let cache = rt.rid_cache(ColumnIdx::new(0)).unwrap();
        rt.close();
        rt.close();

        assert!(rt.is_closed());
        assert!(rt.cached_columns().is_empty());
        assert!(matches!(
            rt.rid_cache(ColumnIdx::new(0)),
            Err(EmberError::TableClosed)
        ));

        // The scheduled build still runs for a cache someone kept alive.
        scheduler.run_pending();
        assert!(cache.is_built());
    }
}
