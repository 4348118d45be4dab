use std::time::Duration;

/// Raised by a [`Mapper`](super::pipeline::Mapper) for a single row. Staging
/// turns it into a row-level validation error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct MapperFault(pub String);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StagingError {
    #[error("chunk size must be at least 1")]
    InvalidChunkSize,
    #[error("staging cancelled after {done} of {total} rows")]
    Cancelled { done: usize, total: usize },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommitError {
    #[error("chunk size must be at least 1")]
    InvalidChunkSize,
    #[error("no selected rows pass validation")]
    NoValidSelection,
}

/// Failure of one `submit` call. Recorded against the chunk, never raised.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SubmitError {
    #[error("chunk did not finish within {0:?}")]
    Timeout(Duration),
    #[error("backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("no rows loaded")]
    NoRows,
    #[error("rows have not been staged")]
    NotStaged,
    #[error("staging run {got} is not the current run {expected}")]
    StaleRun { expected: String, got: String },
    #[error("row {row_index} is out of range for {total} rows")]
    RowOutOfRange { row_index: usize, total: usize },
    #[error(transparent)]
    Staging(#[from] StagingError),
    #[error(transparent)]
    Commit(#[from] CommitError),
}
