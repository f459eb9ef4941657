//! Transaction journals and ordered rid caches for EmberDB tables.
//!
//! - [`OperationJournal`]: a transaction's log of primitive table operations,
//!   split per table at commit.
//! - [`VersionedTableJournals`]: committed journals of one table, kept until
//!   no open transaction needs them.
//! - [`OrderedRowCache`]: per-column rids that order rows by value without
//!   the comparator, built lazily in the background.
//! - [`TableRuntime`]: ties the above to one open table.

pub mod config;
pub mod observability;
pub mod op_journal;
mod ordered_index;
pub mod rid_cache;
pub mod row_store;
pub mod scheduler;
pub mod table_journal;
pub mod table_runtime;
pub mod versioned;

pub use config::{
    DEFAULT_BUILD_DELAY, DEFAULT_GAP_BUDGET, DEFAULT_MAX_GAP, DEFAULT_MIN_GAP, EngineConfig,
    RidCacheConfig,
};
pub use observability::SharedObserver;
pub use op_journal::{CommitSplit, OP_RECORD_BYTES, OperationJournal, TableOp};
pub use rid_cache::{BuildOutcome, BuildState, CLOSE_CHECK_INTERVAL, OrderedRowCache};
pub use row_store::{MemRowStore, RootLockGuard, RowStore};
pub use scheduler::{BuildScheduler, ManualScheduler, ScheduledTask, ThreadScheduler};
pub use table_journal::{PerTableJournal, RowOp};
pub use table_runtime::{RowMutationGuard, TableRuntime};
pub use versioned::{RowConflict, VersionedTableJournals};
