//! Diagnostics plumbing for the journal and rid-cache layer.
//!
//! Every event goes to the process-wide counters first, then to the optional
//! observer registered on the emitting component.
//!
//! **Invariant:** nothing here blocks. Emitters may hold a table's journal
//! lock or a cache's control lock while calling in.

use std::sync::Arc;

use emberdb_observability::{GLOBAL_SUBSYSTEM_METRICS, SubsystemEvent, SubsystemObserver};

/// Optional observer handle. When `None`, only the global counters move.
pub type SharedObserver = Option<Arc<dyn SubsystemObserver>>;

/// Fold `event` into the global counters and hand it to `observer`.
#[inline]
pub(crate) fn emit(observer: &SharedObserver, event: &SubsystemEvent) {
    GLOBAL_SUBSYSTEM_METRICS.record(event);
    if let Some(obs) = observer {
        obs.on_event(event);
    }
}

#[cfg(test)]
mod tests {
    use emberdb_observability::MetricsObserver;
    use emberdb_types::{ColumnIdx, TableId};

    use super::*;

    #[test]
    fn test_emit_reaches_observer() {
        let observer = Arc::new(MetricsObserver::new(4));
        let shared: SharedObserver = Some(observer.clone());
        let event = SubsystemEvent::RidRehash {
            table: TableId::new(9),
            column: ColumnIdx::new(1),
            entries: 3,
            hash_rid_difference: 8,
        };

        emit(&shared, &event);
        emit(&None, &event);

        assert_eq!(observer.recent_events(), vec![event]);
        assert_eq!(observer.metrics().rehash_total, 1);
    }
}
