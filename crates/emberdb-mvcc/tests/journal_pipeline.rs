//! Transaction journals flowing through commit, conflict checks and merge.
//!
//! Several simulated transactions record operations on a handful of tables,
//! commit in sequence order, and the per-table lists are merged as the
//! oldest open snapshot advances.

use std::collections::BTreeMap;
use std::sync::Arc;

use emberdb_error::EmberError;
use emberdb_mvcc::{
    EngineConfig, ManualScheduler, MemRowStore, OperationJournal, RowOp, TableRuntime,
};
use emberdb_observability::{MetricsObserver, SubsystemEvent, SubsystemObserver};
use emberdb_types::{CommitSeq, RowIndex, TableId};

fn open_tables(ids: &[u32], observer: &Arc<MetricsObserver>) -> BTreeMap<TableId, TableRuntime> {
    ids.iter()
        .map(|&id| {
            let table = TableId::new(id);
            let rt = TableRuntime::with_observer(
                table,
                Arc::new(MemRowStore::new()),
                Arc::new(ManualScheduler::new()),
                EngineConfig::default(),
                Some(Arc::clone(observer) as Arc<dyn SubsystemObserver>),
            );
            (table, rt)
        })
        .collect()
}

/// Commit `journal` at `seq`, routing per-table journals to their runtimes.
fn commit(
    tables: &BTreeMap<TableId, TableRuntime>,
    journal: OperationJournal,
    seq: u64,
) -> Result<(), EmberError> {
    let split = journal.into_commit_split(CommitSeq::new(seq))?;
    for pt in split.table_journals {
        tables
            .get(&pt.table())
            .ok_or_else(|| EmberError::internal(format!("{} is not open", pt.table())))?
            .commit(pt)?;
    }
    Ok(())
}

#[test]
fn commit_split_routes_rows_per_table() {
    let observer = Arc::new(MetricsObserver::default());
    let tables = open_tables(&[1, 2], &observer);
    let (t1, t2) = (TableId::new(1), TableId::new(2));

    let txn = OperationJournal::new();
    txn.record_touched_table(t2);
    txn.record_touched_table(t1);
    txn.record_row_added(t2, RowIndex::new(0));
    txn.record_row_added(t1, RowIndex::new(7));
    txn.record_row_removed(t2, RowIndex::new(3));
    txn.record_constraint_altered(t1);
    commit(&tables, txn, 1).expect("commit");

    let t2_journals = tables[&t2].journals_since(CommitSeq::ZERO);
    assert_eq!(t2_journals.len(), 1);
    assert_eq!(
        t2_journals[0].ops(),
        &[RowOp::Added(RowIndex::new(0)), RowOp::Removed(RowIndex::new(3))]
    );
    assert_eq!(tables[&t1].journals().pending_len(), 1);
}

#[test]
fn first_committer_wins_then_merge() {
    let observer = Arc::new(MetricsObserver::default());
    let tables = open_tables(&[5], &observer);
    let t = TableId::new(5);

    // Two transactions start at snapshot 10 and write row 4.
    let snapshot = CommitSeq::new(10);
    let a = OperationJournal::new();
    a.record_row_added(t, RowIndex::new(4));
    let b = OperationJournal::new();
    b.record_row_removed(t, RowIndex::new(4));
    b.record_row_added(t, RowIndex::new(9));

    commit(&tables, a, 11).expect("first committer");

    let rt = &tables[&t];
    let err = rt
        .journals()
        .check_write_set(snapshot, &[RowIndex::new(4), RowIndex::new(9)])
        .expect_err("second committer conflicts");
    assert!(matches!(
        err,
        EmberError::RowWriteConflict {
            table: 5,
            row: 4,
            commit: 11
        }
    ));
    assert!(err.is_transient());
    drop(b);

    // Oldest open snapshot moves past 11: the journal can go.
    assert!(rt.merge_up_to(CommitSeq::new(12)));
    assert!(!rt.journals().has_pending());
    assert_eq!(
        observer.recent_events().last(),
        Some(&SubsystemEvent::JournalsMerged {
            table: t,
            merged: 1,
            remaining: 0,
            through: CommitSeq::new(12),
        })
    );
}

#[test]
fn merges_follow_the_oldest_snapshot() {
    let observer = Arc::new(MetricsObserver::default());
    let tables = open_tables(&[1], &observer);
    let t = TableId::new(1);
    let rt = &tables[&t];

    for seq in [5, 9, 12] {
        let txn = OperationJournal::new();
        txn.record_row_added(t, RowIndex::new(u32::try_from(seq).expect("small")));
        commit(&tables, txn, seq).expect("commit");
    }

    assert!(!rt.merge_up_to(CommitSeq::new(10)));
    let left: Vec<u64> = rt
        .journals_since(CommitSeq::ZERO)
        .iter()
        .map(|j| j.commit_seq().get())
        .collect();
    assert_eq!(left, vec![12]);

    // A late commit with an older sequence is refused and changes nothing.
    let stale = OperationJournal::new();
    stale.record_row_added(t, RowIndex::new(1));
    let err = commit(&tables, stale, 8).expect_err("out of order");
    assert!(matches!(err, EmberError::ProtocolViolation { .. }));
    assert_eq!(rt.journals().pending_len(), 1);

    assert!(rt.merge_up_to(CommitSeq::new(100)));
    assert!((observer.metrics().avg_merge_batch_size() - 1.5).abs() < f64::EPSILON);
}

#[test]
fn corrupt_log_fails_commit_without_side_effects() {
    let observer = Arc::new(MetricsObserver::default());
    let tables = open_tables(&[1], &observer);

    let txn = OperationJournal::new();
    txn.record_row_added(TableId::new(1), RowIndex::new(0));
    let mut bytes = txn.encoded_log();
    bytes.push(0xee);

    let err = commit(&tables, OperationJournal::from_encoded_log(bytes), 1)
        .expect_err("corrupt log");
    assert!(err.is_corruption());
    assert_eq!(err.user_message(), emberdb_error::INTERNAL_DATABASE_ERROR);
    assert!(!tables[&TableId::new(1)].journals().has_pending());
}
