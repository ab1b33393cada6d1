use ethereum_types::H256;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrieError {
    #[error("Invalid trie input: {0}")]
    InvalidInput(String),
    #[error("Inconsistent internal tree structure")]
    InconsistentTree,
    #[error("Lock Error: Panicked when trying to acquire a lock")]
    LockError,
    #[error("Database error: {0:#}")]
    DbError(anyhow::Error),
    #[error("Malformed batch: {0}")]
    MalformedBatch(String),
    #[error("Operation canceled")]
    Canceled,
    #[error("Deadline exceeded")]
    DeadlineExceeded,
    #[error("Failed to build the update thread pool: {0}")]
    ThreadPool(String),

    // The store is missing a batch referenced by a reachable digest.
    #[error("Inconsistent internal tree structure: batch {0:#x} not found in the database")]
    BatchNotFound(H256),
}

impl TrieError {
    /// Whether the error was produced by cancellation rather than by the operation itself.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TrieError::Canceled | TrieError::DeadlineExceeded)
    }
}
