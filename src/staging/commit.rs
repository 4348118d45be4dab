use super::error::{CommitError, SubmitError};
use super::model::{MappedRow, StagedRow};
use super::pipeline::CancelToken;
use super::selection::SelectionState;
use serde::Serialize;
use std::ops::ControlFlow;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_COMMIT_CHUNK_SIZE: usize = 100;
pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(30);

/// Counts reported by the backend for one submitted chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitBatchResult {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Persists one chunk of mapped rows.
///
/// `deadline` is the latest instant the call may return successfully;
/// implementations that cannot finish by then return [`SubmitError::Timeout`].
pub trait Submitter {
    fn submit(
        &mut self,
        rows: &[&MappedRow],
        deadline: Instant,
    ) -> Result<CommitBatchResult, SubmitError>;
}

impl<F> Submitter for F
where
    F: FnMut(&[&MappedRow], Instant) -> Result<CommitBatchResult, SubmitError>,
{
    fn submit(
        &mut self,
        rows: &[&MappedRow],
        deadline: Instant,
    ) -> Result<CommitBatchResult, SubmitError> {
        self(rows, deadline)
    }
}

#[derive(Debug, Clone)]
pub struct CommitOptions {
    pub chunk_size: usize,
    pub chunk_timeout: Duration,
    pub cancel: Option<CancelToken>,
}

impl Default for CommitOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_COMMIT_CHUNK_SIZE,
            chunk_timeout: DEFAULT_CHUNK_TIMEOUT,
            cancel: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitOutcome {
    Succeeded,
    PartiallySucceeded,
    Failed,
    Cancelled,
}

impl CommitOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            CommitOutcome::Succeeded => "succeeded",
            CommitOutcome::PartiallySucceeded => "partially_succeeded",
            CommitOutcome::Failed => "failed",
            CommitOutcome::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkFailure {
    pub chunk_index: usize,
    pub first_row_index: usize,
    pub row_count: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResult {
    pub outcome: CommitOutcome,
    pub work_count: usize,
    pub created_count: usize,
    pub updated_count: usize,
    pub skipped_count: usize,
    pub error_count: usize,
    pub not_attempted_count: usize,
    pub failures: Vec<ChunkFailure>,
}

impl CommitResult {
    fn new(work_count: usize) -> Self {
        Self {
            outcome: CommitOutcome::Succeeded,
            work_count,
            created_count: 0,
            updated_count: 0,
            skipped_count: 0,
            error_count: 0,
            not_attempted_count: 0,
            failures: Vec::new(),
        }
    }

    fn succeeded_rows(&self) -> usize {
        self.created_count + self.updated_count + self.skipped_count
    }
}

/// Rows that are both selected and valid, in `row_index` order.
pub fn work_set<'a>(rows: &'a [StagedRow], selection: &SelectionState) -> Vec<&'a StagedRow> {
    selection
        .materialize(rows)
        .into_iter()
        .filter(|r| r.is_valid())
        .collect()
}

/// Submits the selected valid rows in sequential chunks.
///
/// A failing chunk is recorded and the next chunk still runs. `on_progress`
/// is called once per chunk with the number of rows handled so far.
pub fn commit<S, P>(
    rows: &[StagedRow],
    selection: &SelectionState,
    submitter: &mut S,
    options: &CommitOptions,
    mut on_progress: P,
) -> Result<CommitResult, CommitError>
where
    S: Submitter + ?Sized,
    P: FnMut(usize, usize) -> ControlFlow<()>,
{
    if options.chunk_size == 0 {
        return Err(CommitError::InvalidChunkSize);
    }
    let work = work_set(rows, selection);
    if work.is_empty() {
        return Err(CommitError::NoValidSelection);
    }

    let total = work.len();
    info!(rows = total, chunk_size = options.chunk_size, "commit started");
    let mut result = CommitResult::new(total);
    let mut done = 0usize;

    for (chunk_index, chunk) in work.chunks(options.chunk_size).enumerate() {
        if options.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            result.outcome = CommitOutcome::Cancelled;
            break;
        }

        let mapped: Vec<&MappedRow> = chunk.iter().map(|r| &r.mapped).collect();
        let started = Instant::now();
        let deadline = started + options.chunk_timeout;
        let outcome = match submitter.submit(&mapped, deadline) {
            Err(SubmitError::Backend(_)) if started.elapsed() > options.chunk_timeout => {
                Err(SubmitError::Timeout(options.chunk_timeout))
            }
            other => other,
        };

        match outcome {
            Ok(batch) => {
                debug!(chunk_index, rows = chunk.len(), ?batch, "commit chunk done");
                result.created_count += batch.created;
                result.updated_count += batch.updated;
                result.skipped_count += batch.skipped;
                result.error_count += batch.errors;
            }
            Err(e) => {
                warn!(chunk_index, rows = chunk.len(), error = %e, "commit chunk failed");
                result.error_count += chunk.len();
                result.failures.push(ChunkFailure {
                    chunk_index,
                    first_row_index: chunk[0].row_index,
                    row_count: chunk.len(),
                    message: e.to_string(),
                });
            }
        }

        done += chunk.len();
        if on_progress(done, total).is_break() && done < total {
            result.outcome = CommitOutcome::Cancelled;
            break;
        }
    }

    result.not_attempted_count = total - done;
    if result.outcome != CommitOutcome::Cancelled {
        result.outcome = if result.error_count == 0 {
            CommitOutcome::Succeeded
        } else if result.succeeded_rows() == 0 {
            CommitOutcome::Failed
        } else {
            CommitOutcome::PartiallySucceeded
        };
    }

    info!(
        outcome = result.outcome.as_str(),
        created = result.created_count,
        updated = result.updated_count,
        skipped = result.skipped_count,
        errors = result.error_count,
        not_attempted = result.not_attempted_count,
        "commit finished"
    );
    Ok(result)
}
