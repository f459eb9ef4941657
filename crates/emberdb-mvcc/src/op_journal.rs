//! Transaction-local operation journal.
//!
//! Every primitive table operation a transaction performs is appended to a
//! compact encoded log. At commit-prepare the log is scanned once and split
//! into one [`PerTableJournal`] per table; DDL-ish entries (create, drop,
//! constraint change) are reported separately.
//!
//! Log record layout, little endian, fixed width:
//!
//! ```text
//! [tag: u8][table: u32][row: u32]   (row is 0 for table-level ops)
//! ```

use std::collections::BTreeMap;

use emberdb_error::{EmberError, Result};
use emberdb_types::{CommitSeq, RowIndex, TableId};
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::table_journal::{PerTableJournal, RowOp};

/// Size of one encoded log record.
pub const OP_RECORD_BYTES: usize = 9;

const TAG_ROW_ADDED: u8 = 1;
const TAG_ROW_REMOVED: u8 = 2;
const TAG_TABLE_CREATED: u8 = 3;
const TAG_TABLE_DROPPED: u8 = 4;
const TAG_CONSTRAINT_ALTERED: u8 = 5;

/// A primitive operation recorded by a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableOp {
    RowAdded { table: TableId, row: RowIndex },
    RowRemoved { table: TableId, row: RowIndex },
    TableCreated(TableId),
    TableDropped(TableId),
    ConstraintAltered(TableId),
}

impl TableOp {
    #[must_use]
    pub const fn table(self) -> TableId {
        match self {
            Self::RowAdded { table, .. }
            | Self::RowRemoved { table, .. }
            | Self::TableCreated(table)
            | Self::TableDropped(table)
            | Self::ConstraintAltered(table) => table,
        }
    }

    fn encode_into(self, buf: &mut Vec<u8>) {
        let (tag, row) = match self {
            Self::RowAdded { row, .. } => (TAG_ROW_ADDED, row.get()),
            Self::RowRemoved { row, .. } => (TAG_ROW_REMOVED, row.get()),
            Self::TableCreated(_) => (TAG_TABLE_CREATED, 0),
            Self::TableDropped(_) => (TAG_TABLE_DROPPED, 0),
            Self::ConstraintAltered(_) => (TAG_CONSTRAINT_ALTERED, 0),
        };
        buf.push(tag);
        buf.extend_from_slice(&self.table().get().to_le_bytes());
        buf.extend_from_slice(&row.to_le_bytes());
    }

    fn decode(record: &[u8], offset: usize) -> Result<Self> {
        let field = |at: usize| -> u32 {
            let mut raw = [0_u8; 4];
            raw.copy_from_slice(&record[at..at + 4]);
            u32::from_le_bytes(raw)
        };
        let table = TableId::new(field(1));
        let row = RowIndex::new(field(5));
        match record[0] {
            TAG_ROW_ADDED => Ok(Self::RowAdded { table, row }),
            TAG_ROW_REMOVED => Ok(Self::RowRemoved { table, row }),
            TAG_TABLE_CREATED => Ok(Self::TableCreated(table)),
            TAG_TABLE_DROPPED => Ok(Self::TableDropped(table)),
            TAG_CONSTRAINT_ALTERED => Ok(Self::ConstraintAltered(table)),
            tag => {
                error!(tag, offset, "unknown operation tag in journal");
                Err(EmberError::journal_corrupt(format!(
                    "unknown tag {tag:#04x} at offset {offset}"
                )))
            }
        }
    }
}

/// Decode every record of `bytes` in order, stopping at the first bad one.
fn scan_log(bytes: &[u8], mut visit: impl FnMut(TableOp)) -> Result<()> {
    let records = bytes.chunks_exact(OP_RECORD_BYTES);
    if !records.remainder().is_empty() {
        return Err(EmberError::journal_corrupt(format!(
            "truncated record: {} trailing bytes",
            records.remainder().len()
        )));
    }
    for (i, record) in records.enumerate() {
        visit(TableOp::decode(record, i * OP_RECORD_BYTES)?);
    }
    Ok(())
}

#[derive(Debug, Default)]
struct JournalLog {
    bytes: Vec<u8>,
    /// Sorted, duplicate-free.
    touched: Vec<TableId>,
    saw_created: bool,
    saw_dropped: bool,
    saw_altered: bool,
}

impl JournalLog {
    fn append(&mut self, op: TableOp) {
        match op {
            TableOp::TableCreated(_) => self.saw_created = true,
            TableOp::TableDropped(_) => self.saw_dropped = true,
            TableOp::ConstraintAltered(_) => self.saw_altered = true,
            TableOp::RowAdded { .. } | TableOp::RowRemoved { .. } => {}
        }
        op.encode_into(&mut self.bytes);
    }

    fn touch(&mut self, table: TableId) {
        if let Err(pos) = self.touched.binary_search(&table) {
            self.touched.insert(pos, table);
        }
    }

    fn per_table_journals(&self, commit_seq: CommitSeq) -> Result<Vec<PerTableJournal>> {
        let mut by_table: BTreeMap<TableId, PerTableJournal> = BTreeMap::new();
        scan_log(&self.bytes, |op| {
            let (table, row_op) = match op {
                TableOp::RowAdded { table, row } => (table, RowOp::Added(row)),
                TableOp::RowRemoved { table, row } => (table, RowOp::Removed(row)),
                TableOp::TableCreated(_)
                | TableOp::TableDropped(_)
                | TableOp::ConstraintAltered(_) => return,
            };
            by_table
                .entry(table)
                .or_insert_with(|| PerTableJournal::new(table, commit_seq, Vec::new()))
                .push(row_op);
        })?;
        Ok(by_table.into_values().collect())
    }

    fn tables_matching(&self, seen: bool, wanted: fn(TableOp) -> bool) -> Result<Vec<TableId>> {
        if !seen {
            return Ok(Vec::new());
        }
        let mut tables = Vec::new();
        scan_log(&self.bytes, |op| {
            if wanted(op) && !tables.contains(&op.table()) {
                tables.push(op.table());
            }
        })?;
        Ok(tables)
    }

    fn created(&self) -> Result<Vec<TableId>> {
        self.tables_matching(self.saw_created, |op| {
            matches!(op, TableOp::TableCreated(_))
        })
    }

    fn dropped(&self) -> Result<Vec<TableId>> {
        self.tables_matching(self.saw_dropped, |op| {
            matches!(op, TableOp::TableDropped(_))
        })
    }

    fn constraint_altered(&self) -> Result<Vec<TableId>> {
        self.tables_matching(self.saw_altered, |op| {
            matches!(op, TableOp::ConstraintAltered(_))
        })
    }
}

/// Everything a commit needs from a finished transaction journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSplit {
    /// One journal per table with row changes, ordered by table id.
    pub table_journals: Vec<PerTableJournal>,
    pub created: Vec<TableId>,
    pub dropped: Vec<TableId>,
    pub constraint_altered: Vec<TableId>,
    /// Tables read or written by the transaction, sorted.
    pub touched: Vec<TableId>,
}

/// Append-only log of one transaction's table operations.
///
/// Internally synchronized: every method takes `&self` and is safe to call
/// from several threads, although a transaction normally drives its journal
/// from one.
#[derive(Debug, Default)]
pub struct OperationJournal {
    log: Mutex<JournalLog>,
}

impl OperationJournal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a journal from an encoded log, e.g. one shipped between
    /// workers. The log is not validated here; scans report corruption.
    #[must_use]
    pub fn from_encoded_log(bytes: Vec<u8>) -> Self {
        Self {
            log: Mutex::new(JournalLog {
                bytes,
                touched: Vec::new(),
                // Unknown contents: never short-circuit the kind scans.
                saw_created: true,
                saw_dropped: true,
                saw_altered: true,
            }),
        }
    }

    /// Copy of the encoded log.
    #[must_use]
    pub fn encoded_log(&self) -> Vec<u8> {
        self.log.lock().bytes.clone()
    }

    /// Note that the transaction read or wrote `table`.
    pub fn record_touched_table(&self, table: TableId) {
        self.log.lock().touch(table);
    }

    pub fn record_row_added(&self, table: TableId, row: RowIndex) {
        self.log.lock().append(TableOp::RowAdded { table, row });
    }

    pub fn record_row_removed(&self, table: TableId, row: RowIndex) {
        self.log.lock().append(TableOp::RowRemoved { table, row });
    }

    pub fn record_table_created(&self, table: TableId) {
        self.log.lock().append(TableOp::TableCreated(table));
    }

    pub fn record_table_dropped(&self, table: TableId) {
        self.log.lock().append(TableOp::TableDropped(table));
    }

    pub fn record_constraint_altered(&self, table: TableId) {
        self.log.lock().append(TableOp::ConstraintAltered(table));
    }

    /// Number of recorded operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.log.lock().bytes.len() / OP_RECORD_BYTES
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.lock().bytes.is_empty()
    }

    /// Touched tables, sorted ascending.
    #[must_use]
    pub fn touched_tables(&self) -> Vec<TableId> {
        self.log.lock().touched.clone()
    }

    #[must_use]
    pub fn has_touched(&self, table: TableId) -> bool {
        self.log.lock().touched.binary_search(&table).is_ok()
    }

    /// Decode the whole log in order.
    pub fn ops(&self) -> Result<Vec<TableOp>> {
        let log = self.log.lock();
        let mut ops = Vec::with_capacity(log.bytes.len() / OP_RECORD_BYTES);
        scan_log(&log.bytes, |op| ops.push(op))?;
        Ok(ops)
    }

    /// Group row operations by table, preserving per-table order.
    ///
    /// Create/drop/alter entries are not part of the result.
    pub fn build_per_table_journals(&self, commit_seq: CommitSeq) -> Result<Vec<PerTableJournal>> {
        self.log.lock().per_table_journals(commit_seq)
    }

    pub fn created_tables(&self) -> Result<Vec<TableId>> {
        self.log.lock().created()
    }

    pub fn dropped_tables(&self) -> Result<Vec<TableId>> {
        self.log.lock().dropped()
    }

    pub fn constraint_altered_tables(&self) -> Result<Vec<TableId>> {
        self.log.lock().constraint_altered()
    }

    /// Consume the journal at commit-prepare.
    pub fn into_commit_split(self, commit_seq: CommitSeq) -> Result<CommitSplit> {
        let log = self.log.into_inner();
        let split = CommitSplit {
            table_journals: log.per_table_journals(commit_seq)?,
            created: log.created()?,
            dropped: log.dropped()?,
            constraint_altered: log.constraint_altered()?,
            touched: log.touched,
        };
        debug!(
            commit_seq = commit_seq.get(),
            tables = split.table_journals.len(),
            created = split.created.len(),
            dropped = split.dropped.len(),
            "transaction journal split for commit"
        );
        Ok(split)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn t(n: u32) -> TableId {
        TableId::new(n)
    }

    fn r(n: u32) -> RowIndex {
        RowIndex::new(n)
    }

    #[test]
    fn test_touched_tables_sorted_and_unique() {
        let journal = OperationJournal::new();
        for id in [7, 3, 9, 3, 1, 7] {
            journal.record_touched_table(t(id));
        }
        assert_eq!(journal.touched_tables(), vec![t(1), t(3), t(7), t(9)]);
        assert!(journal.has_touched(t(9)));
        assert!(!journal.has_touched(t(2)));
        assert!(journal.is_empty(), "touching is not an operation");
    }

    #[test]
    fn test_per_table_grouping_preserves_order() {
        let journal = OperationJournal::new();
        journal.record_row_added(t(2), r(10));
        journal.record_row_added(t(1), r(5));
        journal.record_table_created(t(3));
        journal.record_row_removed(t(2), r(4));
        journal.record_row_added(t(2), r(11));
        journal.record_constraint_altered(t(1));

        let journals = journal.build_per_table_journals(CommitSeq::new(8)).unwrap();
        assert_eq!(journals.len(), 2);

        assert_eq!(journals[0].table(), t(1));
        assert_eq!(journals[0].ops(), &[RowOp::Added(r(5))]);

        assert_eq!(journals[1].table(), t(2));
        assert_eq!(journals[1].commit_seq(), CommitSeq::new(8));
        assert_eq!(
            journals[1].ops(),
            &[RowOp::Added(r(10)), RowOp::Removed(r(4)), RowOp::Added(r(11))]
        );
    }

    #[test]
    fn test_kind_lists() {
        let journal = OperationJournal::new();
        assert!(journal.created_tables().unwrap().is_empty());

        journal.record_table_created(t(4));
        journal.record_table_dropped(t(2));
        journal.record_table_created(t(1));
        journal.record_table_created(t(4));

        assert_eq!(journal.created_tables().unwrap(), vec![t(4), t(1)]);
        assert_eq!(journal.dropped_tables().unwrap(), vec![t(2)]);
        assert!(journal.constraint_altered_tables().unwrap().is_empty());
        assert!(journal.build_per_table_journals(CommitSeq::new(1)).unwrap().is_empty());
    }

    #[test]
    fn test_ops_round_trip_in_order() {
        let journal = OperationJournal::new();
        journal.record_row_added(t(1), r(u32::MAX));
        journal.record_table_dropped(t(u32::MAX));
        assert_eq!(journal.len(), 2);
        assert_eq!(
            journal.ops().unwrap(),
            vec![
                TableOp::RowAdded {
                    table: t(1),
                    row: r(u32::MAX)
                },
                TableOp::TableDropped(t(u32::MAX)),
            ]
        );
    }

    #[test]
    fn test_unknown_tag_is_corruption() {
        let journal = OperationJournal::new();
        journal.record_row_added(t(1), r(1));
        journal.record_row_added(t(1), r(2));
        let mut bytes = journal.encoded_log();
        bytes[OP_RECORD_BYTES] = 0x7f;

        let corrupt = OperationJournal::from_encoded_log(bytes);
        let err = corrupt
            .build_per_table_journals(CommitSeq::new(1))
            .unwrap_err();
        assert!(err.is_corruption());
        assert!(err.to_string().contains("0x7f"), "{err}");
        assert!(corrupt.dropped_tables().is_err());
        assert!(corrupt.ops().is_err());
    }

    #[test]
    fn test_truncated_log_is_corruption() {
        let corrupt = OperationJournal::from_encoded_log(vec![TAG_ROW_ADDED, 0, 0]);
        assert!(matches!(
            corrupt.created_tables(),
            Err(EmberError::JournalCorrupt { .. })
        ));
    }

    #[test]
    fn test_into_commit_split() {
        let journal = OperationJournal::new();
        journal.record_touched_table(t(5));
        journal.record_touched_table(t(2));
        journal.record_row_added(t(5), r(0));
        journal.record_table_dropped(t(2));

        let split = journal.into_commit_split(CommitSeq::new(42)).unwrap();
        assert_eq!(split.touched, vec![t(2), t(5)]);
        assert_eq!(split.dropped, vec![t(2)]);
        assert!(split.created.is_empty());
        assert_eq!(split.table_journals.len(), 1);
        assert_eq!(split.table_journals[0].commit_seq(), CommitSeq::new(42));
    }

    #[test]
    fn test_concurrent_appends_all_land() {
        let journal = Arc::new(OperationJournal::new());
        let handles: Vec<_> = (0..4_u32)
            .map(|table| {
                let journal = Arc::clone(&journal);
                thread::spawn(move || {
                    for row in 0..250 {
                        journal.record_row_added(t(table), r(row));
                        journal.record_touched_table(t(table));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(journal.len(), 1_000);
        let journals = journal.build_per_table_journals(CommitSeq::new(1)).unwrap();
        assert_eq!(journals.len(), 4);
        for j in &journals {
            // Each thread appended its own table in row order.
            let rows: Vec<u32> = j.ops().iter().map(|op| op.row().get()).collect();
            assert_eq!(rows, (0..250).collect::<Vec<_>>());
        }
        assert_eq!(journal.touched_tables().len(), 4);
    }
}
