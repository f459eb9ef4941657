//! Committed row-level changes of one transaction against one table.

use std::collections::BTreeSet;

use emberdb_types::{CommitSeq, RowIndex, TableId};

/// One row-level operation inside a [`PerTableJournal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowOp {
    Added(RowIndex),
    Removed(RowIndex),
}

impl RowOp {
    #[must_use]
    pub const fn row(self) -> RowIndex {
        match self {
            Self::Added(row) | Self::Removed(row) => row,
        }
    }
}

/// Ordered row operations for one table, stamped with the commit that
/// produced them.
///
/// Two journals of the same table are totally ordered by [`CommitSeq`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerTableJournal {
    table: TableId,
    commit_seq: CommitSeq,
    ops: Vec<RowOp>,
}

impl PerTableJournal {
    #[must_use]
    pub const fn new(table: TableId, commit_seq: CommitSeq, ops: Vec<RowOp>) -> Self {
        Self {
            table,
            commit_seq,
            ops,
        }
    }

    #[must_use]
    pub const fn table(&self) -> TableId {
        self.table
    }

    #[must_use]
    pub const fn commit_seq(&self) -> CommitSeq {
        self.commit_seq
    }

    #[must_use]
    pub fn ops(&self) -> &[RowOp] {
        &self.ops
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Distinct rows added or removed by this journal.
    #[must_use]
    pub fn touched_rows(&self) -> BTreeSet<RowIndex> {
        self.ops.iter().map(|op| op.row()).collect()
    }

    /// Whether `row` was added or removed by this journal.
    #[must_use]
    pub fn touches(&self, row: RowIndex) -> bool {
        self.ops.iter().any(|op| op.row() == row)
    }

    pub(crate) fn push(&mut self, op: RowOp) {
        self.ops.push(op);
    }
}
