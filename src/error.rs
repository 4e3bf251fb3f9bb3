use thiserror::Error;

/// Every failure mode the core can surface to a caller.
///
/// There are exactly the four kinds the design calls for, plus `Lock` for
/// advisory file-lock failures (those are an I/O-adjacent concern but
/// distinct enough from a plain read/write failure to be worth naming).
#[derive(Error, Debug)]
pub enum DbError {
    #[error("key not found")]
    KeyNotFound,

    #[error("database is closed")]
    DatabaseClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt record at offset {offset}: {reason}")]
    CorruptRecord { offset: u64, reason: String },

    #[error("failed to acquire advisory file lock: {0}")]
    Lock(std::io::Error),
}

pub type Result<T> = std::result::Result<T, DbError>;
