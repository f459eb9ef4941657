use thiserror::Error;

/// Primary error type for EmberDB's journal and rid-cache layer.
///
/// Corruption variants describe broken internal structures and are never
/// retried. Collaborator variants wrap failures surfaced by the row store or
/// the scheduler; they abort the operation that observed them without
/// touching unrelated state.
#[derive(Error, Debug)]
pub enum EmberError {
    // === Corruption ===
    /// The encoded operation log holds a record that cannot be decoded.
    #[error("operation journal is corrupt: {detail}")]
    JournalCorrupt { detail: String },

    /// A value-ordered index was found out of order while assigning rids.
    #[error("value-ordered index is not sorted at position {position}")]
    IndexUnsorted { position: usize },

    /// A rehash finished without assigning a rid to the row being placed.
    #[error("rid rehash produced no assignment for row {row}")]
    RehashFailed { row: u32 },

    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),

    // === Protocol ===
    /// A caller broke a documented precondition of the journal protocol.
    #[error("protocol violation: {detail}")]
    ProtocolViolation { detail: String },

    // === Transaction ===
    /// A concurrently committed journal touched a row this transaction wrote.
    #[error("write conflict on table {table} row {row}: committed at cs#{commit}")]
    RowWriteConflict { table: u32, row: u32, commit: u64 },

    // === Collaborators ===
    /// The backing row store failed while serving a read.
    #[error("row store failure: {detail}")]
    RowStore { detail: String },

    /// The requested row slot does not exist in the backing store.
    #[error("no such row: {row}")]
    NoSuchRow { row: u32 },

    /// The owning table was closed.
    #[error("table is closed")]
    TableClosed,

    /// I/O error surfaced by a collaborator.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Configuration ===
    /// A tuning parameter was rejected.
    #[error("invalid value for {name}: {detail}")]
    InvalidConfig { name: String, detail: String },
}

/// Result codes shared with the embedding query layer.
///
/// The numeric values follow the classic SQLite result codes so that the
/// surrounding engine can forward them unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Successful result.
    Ok = 0,
    /// Generic error.
    Error = 1,
    /// Internal logic error.
    Internal = 2,
    /// Callback requested abort.
    Abort = 4,
    /// Resource is busy; retry later.
    Busy = 5,
    /// Disk I/O error.
    IoErr = 10,
    /// Internal structure is malformed.
    Corrupt = 11,
    /// Not found.
    NotFound = 12,
    /// Library used incorrectly.
    Misuse = 21,
    /// Value out of range.
    Range = 25,
}

/// Message shown to end users for every internal failure.
pub const INTERNAL_DATABASE_ERROR: &str = "internal database error";

impl EmberError {
    /// Map this error to a result code.
    #[allow(clippy::match_same_arms)]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::JournalCorrupt { .. } | Self::IndexUnsorted { .. } | Self::RehashFailed { .. } => {
                ErrorCode::Corrupt
            }
            Self::Internal(_) => ErrorCode::Internal,
            Self::ProtocolViolation { .. } => ErrorCode::Misuse,
            Self::RowWriteConflict { .. } => ErrorCode::Busy,
            Self::RowStore { .. } | Self::Io(_) => ErrorCode::IoErr,
            Self::NoSuchRow { .. } => ErrorCode::NotFound,
            Self::TableClosed => ErrorCode::Abort,
            Self::InvalidConfig { .. } => ErrorCode::Range,
        }
    }

    /// Whether this error signals broken internal structures.
    pub const fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::JournalCorrupt { .. }
                | Self::IndexUnsorted { .. }
                | Self::RehashFailed { .. }
                | Self::Internal(_)
        )
    }

    /// Whether this is a transient error that may succeed on retry.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RowWriteConflict { .. })
    }

    /// Whether the error belongs to the engine internals rather than to
    /// anything the user did.
    pub const fn is_internal(&self) -> bool {
        !matches!(
            self,
            Self::RowWriteConflict { .. } | Self::InvalidConfig { .. }
        )
    }

    /// Text safe to show an end user.
    ///
    /// Internal kinds collapse to [`INTERNAL_DATABASE_ERROR`]; the detailed
    /// message is for logs only.
    pub fn user_message(&self) -> String {
        if self.is_internal() {
            INTERNAL_DATABASE_ERROR.to_owned()
        } else {
            self.to_string()
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a journal corruption error.
    pub fn journal_corrupt(detail: impl Into<String>) -> Self {
        Self::JournalCorrupt {
            detail: detail.into(),
        }
    }

    /// Create a protocol violation error.
    pub fn protocol(detail: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            detail: detail.into(),
        }
    }

    /// Wrap a row store failure.
    pub fn row_store(detail: impl Into<String>) -> Self {
        Self::RowStore {
            detail: detail.into(),
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvalidConfig {
            name: name.into(),
            detail: detail.into(),
        }
    }
}

/// Result type alias using `EmberError`.
pub type Result<T> = std::result::Result<T, EmberError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_corrupt() {
        let err = EmberError::journal_corrupt("unknown tag 0x7f at offset 18");
        assert_eq!(
            err.to_string(),
            "operation journal is corrupt: unknown tag 0x7f at offset 18"
        );
    }

    #[test]
    fn error_display_conflict() {
        let err = EmberError::RowWriteConflict {
            table: 3,
            row: 42,
            commit: 9,
        };
        assert_eq!(
            err.to_string(),
            "write conflict on table 3 row 42: committed at cs#9"
        );
    }

    #[test]
    fn error_code_mapping() {
        assert_eq!(
            EmberError::IndexUnsorted { position: 4 }.error_code(),
            ErrorCode::Corrupt
        );
        assert_eq!(
            EmberError::RehashFailed { row: 1 }.error_code(),
            ErrorCode::Corrupt
        );
        assert_eq!(EmberError::internal("bug").error_code(), ErrorCode::Internal);
        assert_eq!(EmberError::protocol("x").error_code(), ErrorCode::Misuse);
        assert_eq!(EmberError::row_store("x").error_code(), ErrorCode::IoErr);
        assert_eq!(EmberError::TableClosed.error_code(), ErrorCode::Abort);
        assert_eq!(
            EmberError::invalid_config("min_gap", "too small").error_code(),
            ErrorCode::Range
        );
    }

    #[test]
    fn corruption_kinds() {
        assert!(EmberError::journal_corrupt("x").is_corruption());
        assert!(EmberError::IndexUnsorted { position: 0 }.is_corruption());
        assert!(EmberError::RehashFailed { row: 0 }.is_corruption());
        assert!(EmberError::internal("x").is_corruption());
        assert!(!EmberError::row_store("x").is_corruption());
        assert!(!EmberError::TableClosed.is_corruption());
    }

    #[test]
    fn is_transient() {
        let conflict = EmberError::RowWriteConflict {
            table: 1,
            row: 1,
            commit: 1,
        };
        assert!(conflict.is_transient());
        assert!(!EmberError::IndexUnsorted { position: 0 }.is_transient());
    }

    #[test]
    fn internal_errors_are_masked_for_users() {
        let err = EmberError::IndexUnsorted { position: 17 };
        assert_eq!(err.user_message(), INTERNAL_DATABASE_ERROR);

        let err = EmberError::protocol("append out of order");
        assert_eq!(err.user_message(), INTERNAL_DATABASE_ERROR);

        let err = EmberError::invalid_config("rid_cache.min_gap", "must be at least 2");
        assert_eq!(
            err.user_message(),
            "invalid value for rid_cache.min_gap: must be at least 2"
        );
    }

    #[test]
    fn io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "segment missing");
        let err: EmberError = io_err.into();
        assert!(matches!(err, EmberError::Io(_)));
        assert_eq!(err.error_code(), ErrorCode::IoErr);
    }

    #[test]
    fn error_code_values() {
        assert_eq!(ErrorCode::Ok as i32, 0);
        assert_eq!(ErrorCode::Internal as i32, 2);
        assert_eq!(ErrorCode::Busy as i32, 5);
        assert_eq!(ErrorCode::Corrupt as i32, 11);
        assert_eq!(ErrorCode::Misuse as i32, 21);
    }
}
