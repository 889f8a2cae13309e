//! Store failures.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Database(#[from] rusqlite::Error),

    /// An envelope or row column could not be encoded or decoded.
    #[error("encoding: {0}")]
    Serialization(String),

    /// A row holds a value no writer would produce, such as a short id.
    #[error("corrupt row: {0}")]
    InvalidData(String),

    #[error("schema migration: {0}")]
    Migration(String),

    /// A writer panicked while holding an in-process lock.
    #[error("store lock poisoned: {0}")]
    Poisoned(String),

    /// A `spawn_blocking` task was cancelled or panicked.
    #[error("blocking task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
