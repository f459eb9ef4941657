//! Per-table list of committed journals awaiting merge.
//!
//! Commits append at the tail in commit order; merging retires journals from
//! the head once no open transaction can still need them. Open transactions
//! read everything committed at or after their start to find conflicting
//! writes.

use std::collections::VecDeque;
use std::convert::Infallible;

use emberdb_error::{EmberError, Result};
use emberdb_observability::SubsystemEvent;
use emberdb_types::{CommitSeq, RowIndex, TableId};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::observability::{SharedObserver, emit};
use crate::table_journal::PerTableJournal;

/// A committed journal touched a row another transaction wants to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowConflict {
    pub table: TableId,
    pub row: RowIndex,
    /// Commit of the journal that touched the row.
    pub commit: CommitSeq,
}

impl From<RowConflict> for EmberError {
    fn from(c: RowConflict) -> Self {
        Self::RowWriteConflict {
            table: c.table.get(),
            row: c.row.get(),
            commit: c.commit.get(),
        }
    }
}

/// Pending committed journals of one table, ordered by commit.
///
/// The caller serializes `append_journal` against the merge calls (commit
/// and merge run under the table's commit protocol) and guarantees that no
/// open transaction started before the merge boundary. Reads may run
/// concurrently with either.
pub struct VersionedTableJournals {
    table: TableId,
    pending: Mutex<VecDeque<PerTableJournal>>,
    observer: SharedObserver,
}

impl VersionedTableJournals {
    #[must_use]
    pub fn new(table: TableId) -> Self {
        Self::with_observer(table, None)
    }

    #[must_use]
    pub fn with_observer(table: TableId, observer: SharedObserver) -> Self {
        Self {
            table,
            pending: Mutex::new(VecDeque::new()),
            observer,
        }
    }

    #[must_use]
    pub const fn table(&self) -> TableId {
        self.table
    }

    /// Append a freshly committed journal at the tail.
    ///
    /// # Errors
    ///
    /// [`EmberError::ProtocolViolation`] if the journal belongs to another
    /// table or its commit is older than the current tail. The list is left
    /// unchanged.
    pub fn append_journal(&self, journal: PerTableJournal) -> Result<()> {
        if journal.table() != self.table {
            warn!(
                table = self.table.get(),
                journal_table = journal.table().get(),
                "journal appended to the wrong table"
            );
            return Err(EmberError::protocol(format!(
                "journal for {} appended to {}",
                journal.table(),
                self.table
            )));
        }
        let mut pending = self.pending.lock();
        if let Some(tail) = pending.back() {
            if journal.commit_seq() < tail.commit_seq() {
                warn!(
                    table = self.table.get(),
                    tail = tail.commit_seq().get(),
                    commit = journal.commit_seq().get(),
                    "out-of-order journal append"
                );
                return Err(EmberError::protocol(format!(
                    "commit {} appended after {}",
                    journal.commit_seq(),
                    tail.commit_seq()
                )));
            }
        }
        pending.push_back(journal);
        Ok(())
    }

    /// Retire every journal committed strictly before `commit`.
    ///
    /// Returns `true` when the list ended up empty and `false` as soon as
    /// the head is at or past `commit`. Never skips or reorders journals.
    pub fn merge_up_to(&self, commit: CommitSeq) -> bool {
        match self.drain_head(commit, |_| Ok::<(), Infallible>(())) {
            Ok(emptied) => emptied,
            Err(never) => match never {},
        }
    }

    /// Like [`merge_up_to`](Self::merge_up_to), folding each journal into
    /// the caller's base structures before it is retired.
    ///
    /// `fold` runs under the list's lock and must not call back into this
    /// object.
    ///
    /// # Errors
    ///
    /// The first error from `fold`. That journal stays at the head, and
    /// journals retired before it stay retired.
    pub fn merge_up_to_with(
        &self,
        commit: CommitSeq,
        fold: impl FnMut(&PerTableJournal) -> Result<()>,
    ) -> Result<bool> {
        self.drain_head(commit, fold)
    }

    fn drain_head<E>(
        &self,
        commit: CommitSeq,
        mut fold: impl FnMut(&PerTableJournal) -> std::result::Result<(), E>,
    ) -> std::result::Result<bool, E> {
        let mut pending = self.pending.lock();
        let mut merged = 0_usize;
        let outcome = loop {
            let Some(head) = pending.front() else {
                break Ok(true);
            };
            if head.commit_seq() >= commit {
                break Ok(false);
            }
            if let Err(err) = fold(head) {
                break Err(err);
            }
            pending.pop_front();
            merged += 1;
        };

        if merged > 0 {
            debug!(
                table = self.table.get(),
                merged,
                remaining = pending.len(),
                through = commit.get(),
                "merged table journals"
            );
            emit(
                &self.observer,
                &SubsystemEvent::JournalsMerged {
                    table: self.table,
                    merged,
                    remaining: pending.len(),
                    through: commit,
                },
            );
        }
        outcome
    }

    /// Copies of all journals committed at or after `commit`, in order.
    #[must_use]
    pub fn journals_since(&self, commit: CommitSeq) -> Vec<PerTableJournal> {
        let pending = self.pending.lock();
        // Sorted by commit, so the matching journals form a suffix.
        let start = pending.partition_point(|j| j.commit_seq() < commit);
        pending.range(start..).cloned().collect()
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    #[must_use]
    pub fn oldest_pending_commit(&self) -> Option<CommitSeq> {
        self.pending.lock().front().map(PerTableJournal::commit_seq)
    }

    /// Every `(journal, row)` pair where a journal committed at or after
    /// `since` added or removed one of `rows`. Ordered by commit, then by
    /// the order of `rows`.
    #[must_use]
    pub fn find_conflicts(&self, since: CommitSeq, rows: &[RowIndex]) -> Vec<RowConflict> {
        let pending = self.pending.lock();
        let start = pending.partition_point(|j| j.commit_seq() < since);
        let mut conflicts = Vec::new();
        for journal in pending.range(start..) {
            let touched = journal.touched_rows();
            conflicts.extend(
                rows.iter()
                    .filter(|row| touched.contains(row))
                    .map(|&row| RowConflict {
                        table: self.table,
                        row,
                        commit: journal.commit_seq(),
                    }),
            );
        }
        conflicts
    }

    /// First-committer-wins check for a write set.
    ///
    /// # Errors
    ///
    /// [`EmberError::RowWriteConflict`] for the earliest conflicting commit.
    pub fn check_write_set(&self, since: CommitSeq, rows: &[RowIndex]) -> Result<()> {
        match self.find_conflicts(since, rows).into_iter().next() {
            Some(conflict) => {
                debug!(
                    table = self.table.get(),
                    row = conflict.row.get(),
                    commit = conflict.commit.get(),
                    "write-write conflict"
                );
                Err(conflict.into())
            }
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for VersionedTableJournals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedTableJournals")
            .field("table", &self.table)
            .field("pending", &self.pending_len())
            .field("observed", &self.observer.is_some())
            .finish()
    }
}
