use super::error::{MapperFault, StagingError};
use super::model::{DuplicatePolicy, MappedRow, RawRow, StagedRow, StagingResult, ValidationResult};
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub const DEFAULT_STAGING_CHUNK_SIZE: usize = 500;

/// Turns one raw row into a mapped row plus its validation.
///
/// Implementations are business specific. Staging only relies on the shape of
/// the result; an `Err` is confined to the row that produced it.
pub trait Mapper {
    fn map_row(&self, raw: &RawRow) -> Result<(MappedRow, ValidationResult), MapperFault>;

    /// Key used for duplicate detection. Rows without a key are never duplicates.
    fn duplicate_key(&self, mapped: &MappedRow) -> Option<String> {
        mapped.record_key.clone()
    }

    /// Identifier of an existing record this row corresponds to, if any.
    fn matched_reference(&self, _mapped: &MappedRow) -> Option<String> {
        None
    }
}

impl<F> Mapper for F
where
    F: Fn(&RawRow) -> Result<(MappedRow, ValidationResult), MapperFault>,
{
    fn map_row(&self, raw: &RawRow) -> Result<(MappedRow, ValidationResult), MapperFault> {
        self(raw)
    }
}

/// Shared cancellation flag checked at every chunk boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clears the flag and reports whether it was set.
    pub fn reset(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct StageOptions {
    pub chunk_size: usize,
    pub duplicate_policy: DuplicatePolicy,
    pub cancel: Option<CancelToken>,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_STAGING_CHUNK_SIZE,
            duplicate_policy: DuplicatePolicy::default(),
            cancel: None,
        }
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_lowercase()
}

/// Stages `raw` in sequential chunks.
///
/// `on_progress(done, total)` runs once after every chunk and is the point
/// where control returns to the caller; returning `ControlFlow::Break` stops
/// the run with [`StagingError::Cancelled`].
pub fn stage<M, P>(
    raw: &[RawRow],
    mapper: &M,
    options: &StageOptions,
    mut on_progress: P,
) -> Result<StagingResult, StagingError>
where
    M: Mapper + ?Sized,
    P: FnMut(usize, usize) -> ControlFlow<()>,
{
    if options.chunk_size == 0 {
        return Err(StagingError::InvalidChunkSize);
    }

    let run_id = Uuid::new_v4().to_string();
    let total = raw.len();
    info!(
        run_id = %run_id,
        rows = total,
        chunk_size = options.chunk_size,
        "staging started"
    );

    let mut result = StagingResult::empty(run_id);
    result.rows.reserve(total);
    // normalized duplicate key -> row_index of the row that established it
    let mut first_seen: HashMap<String, usize> = HashMap::new();

    for (chunk_index, chunk) in raw.chunks(options.chunk_size).enumerate() {
        let done_before = chunk_index * options.chunk_size;
        if options.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            info!(run_id = %result.run_id, done = done_before, total, "staging cancelled");
            return Err(StagingError::Cancelled {
                done: done_before,
                total,
            });
        }

        for (offset, raw_row) in chunk.iter().enumerate() {
            let row_index = done_before + offset;
            let staged = stage_row(
                row_index,
                raw_row,
                mapper,
                options.duplicate_policy,
                &mut first_seen,
            );
            if staged.validation.is_valid {
                result.valid_count += 1;
            } else {
                result.error_count += 1;
            }
            if staged.validation.is_duplicate {
                result.duplicate_count += 1;
            }
            result.rows.push(staged);
        }

        let done = done_before + chunk.len();
        debug!(run_id = %result.run_id, chunk_index, done, total, "staging chunk done");
        if on_progress(done, total).is_break() && done < total {
            info!(run_id = %result.run_id, done, total, "staging cancelled");
            return Err(StagingError::Cancelled { done, total });
        }
    }

    info!(
        run_id = %result.run_id,
        valid = result.valid_count,
        errors = result.error_count,
        duplicates = result.duplicate_count,
        "staging finished"
    );
    Ok(result)
}

fn stage_row<M: Mapper + ?Sized>(
    row_index: usize,
    raw: &RawRow,
    mapper: &M,
    policy: DuplicatePolicy,
    first_seen: &mut HashMap<String, usize>,
) -> StagedRow {
    let (mapped, mut validation) = match mapper.map_row(raw) {
        Ok(v) => v,
        Err(fault) => {
            debug!(row_index, error = %fault, "mapper fault");
            (MappedRow::default(), ValidationResult::fault(fault.0))
        }
    };
    // Rows are staged fresh; a mapper cannot pre-flag duplicates.
    validation.is_duplicate = false;
    validation.is_valid = validation.is_valid && validation.errors.is_empty();

    if let Some(key) = mapper.duplicate_key(&mapped).map(|k| normalize_key(&k)) {
        if !key.is_empty() {
            match first_seen.get(&key) {
                Some(&first) => {
                    validation.is_duplicate = true;
                    let message = format!("duplicate of row {first}");
                    match policy {
                        DuplicatePolicy::Reject => {
                            validation.errors.push(message);
                            validation.is_valid = false;
                        }
                        DuplicatePolicy::Warn => validation.warnings.push(message),
                    }
                }
                None => {
                    first_seen.insert(key, row_index);
                }
            }
        }
    }

    let matched_reference_id = mapper.matched_reference(&mapped);
    StagedRow {
        row_index,
        raw: raw.clone(),
        mapped,
        validation,
        matched_reference_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_row(key: &str, qty: i64) -> RawRow {
        let mut row = RawRow::new();
        row.insert("Item".into(), json!(key));
        row.insert("Qty".into(), json!(qty));
        row
    }

    fn keyed_mapper(raw: &RawRow) -> Result<(MappedRow, ValidationResult), MapperFault> {
        let key = raw
            .get("Item")
            .and_then(|v| v.as_str())
            .ok_or_else(|| MapperFault("missing Item".into()))?;
        let qty = raw.get("Qty").and_then(|v| v.as_i64()).unwrap_or(0);
        let mut errors = Vec::new();
        if qty < 0 {
            errors.push("Qty must not be negative".to_string());
        }
        Ok((
            MappedRow {
                fields: raw.clone(),
                record_key: Some(key.to_string()),
            },
            ValidationResult::from_messages(errors, Vec::new()),
        ))
    }

    fn no_progress(_: usize, _: usize) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    #[test]
    fn row_index_matches_input_position() {
        let raw: Vec<RawRow> = (0..37).map(|i| raw_row(&format!("P{i}"), i)).collect();
        let options = StageOptions {
            chunk_size: 5,
            ..Default::default()
        };
        let result = stage(&raw, &keyed_mapper, &options, no_progress).expect("stage");
        assert_eq!(result.rows.len(), 37);
        for (i, row) in result.rows.iter().enumerate() {
            assert_eq!(row.row_index, i);
            assert_eq!(row.raw, raw[i]);
        }
    }

    #[test]
    fn first_row_with_a_key_is_never_the_duplicate() {
        let raw = vec![
            raw_row("A", 1),
            raw_row("B", 1),
            raw_row(" a ", 2),
            raw_row("C", 1),
            raw_row("B", 3),
            raw_row("A", 4),
        ];
        let options = StageOptions {
            chunk_size: 2,
            ..Default::default()
        };
        let first = stage(&raw, &keyed_mapper, &options, no_progress).expect("stage");
        let second = stage(&raw, &keyed_mapper, &options, no_progress).expect("stage");

        let flags: Vec<bool> = first.rows.iter().map(|r| r.validation.is_duplicate).collect();
        let again: Vec<bool> = second.rows.iter().map(|r| r.validation.is_duplicate).collect();
        assert_eq!(flags, vec![false, false, true, false, true, true]);
        assert_eq!(flags, again);
        assert_ne!(first.run_id, second.run_id);

        assert_eq!(first.duplicate_count, 3);
        assert!(!first.rows[2].validation.is_valid);
        assert_eq!(first.rows[2].validation.errors, vec!["duplicate of row 0"]);
        assert_eq!(first.rows[4].validation.errors, vec!["duplicate of row 1"]);
    }

    #[test]
    fn warn_policy_keeps_duplicates_valid() {
        let raw = vec![raw_row("A", 1), raw_row("A", 2), raw_row("A", -1)];
        let options = StageOptions {
            duplicate_policy: DuplicatePolicy::Warn,
            ..Default::default()
        };
        let result = stage(&raw, &keyed_mapper, &options, no_progress).expect("stage");
        assert!(result.rows[1].validation.is_valid);
        assert!(result.rows[1].validation.is_duplicate);
        assert_eq!(result.rows[1].validation.warnings, vec!["duplicate of row 0"]);
        // duplicate and invalid on its own rules
        assert!(!result.rows[2].validation.is_valid);
        assert!(result.rows[2].validation.is_duplicate);
        assert_eq!(result.valid_count, 2);
        assert_eq!(result.error_count, 1);
        assert_eq!(result.duplicate_count, 2);
    }

    #[test]
    fn mapper_fault_only_affects_its_row() {
        let mut broken = RawRow::new();
        broken.insert("Qty".into(), json!(5));
        let raw = vec![raw_row("A", 1), broken, raw_row("B", 1)];
        let result = stage(&raw, &keyed_mapper, &StageOptions::default(), no_progress)
            .expect("stage");
        assert_eq!(result.valid_count, 2);
        assert_eq!(result.error_count, 1);
        let bad = &result.rows[1];
        assert!(!bad.validation.is_valid);
        assert_eq!(bad.validation.errors, vec!["missing Item"]);
        assert_eq!(bad.mapped, MappedRow::default());
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let raw = vec![raw_row("A", 1)];
        let options = StageOptions {
            chunk_size: 0,
            ..Default::default()
        };
        let err = stage(&raw, &keyed_mapper, &options, no_progress).unwrap_err();
        assert_eq!(err, StagingError::InvalidChunkSize);
    }

    #[test]
    fn empty_input_reports_no_progress() {
        let mut calls = 0;
        let result = stage(&[], &keyed_mapper, &StageOptions::default(), |_, _| {
            calls += 1;
            ControlFlow::Continue(())
        })
        .expect("stage");
        assert!(result.rows.is_empty());
        assert_eq!(calls, 0);
    }

    #[test]
    fn hundred_thousand_rows_report_progress_per_chunk() {
        // every 20th row repeats the previous key: 5% duplicates
        let raw: Vec<RawRow> = (0..100_000)
            .map(|i| {
                let key = if i % 20 == 19 { i - 1 } else { i };
                raw_row(&format!("P{key}"), 1)
            })
            .collect();
        let options = StageOptions {
            chunk_size: 500,
            ..Default::default()
        };
        let mut progress = Vec::new();
        let result = stage(&raw, &keyed_mapper, &options, |done, total| {
            progress.push((done, total));
            ControlFlow::Continue(())
        })
        .expect("stage");

        assert_eq!(result.valid_count + result.error_count, 100_000);
        assert_eq!(result.duplicate_count, 5_000);
        assert_eq!(progress.len(), 200);
        assert!(progress.windows(2).all(|w| w[0].0 < w[1].0));
        assert_eq!(progress.last(), Some(&(100_000, 100_000)));
    }

    #[test]
    fn break_from_progress_cancels_the_run() {
        let raw: Vec<RawRow> = (0..10).map(|i| raw_row(&format!("P{i}"), 1)).collect();
        let options = StageOptions {
            chunk_size: 3,
            ..Default::default()
        };
        let err = stage(&raw, &keyed_mapper, &options, |done, _| {
            if done >= 6 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap_err();
        assert_eq!(err, StagingError::Cancelled { done: 6, total: 10 });
    }

    #[test]
    fn cancel_token_stops_at_next_chunk_boundary() {
        let raw: Vec<RawRow> = (0..10).map(|i| raw_row(&format!("P{i}"), 1)).collect();
        let token = CancelToken::new();
        let options = StageOptions {
            chunk_size: 4,
            cancel: Some(token.clone()),
            ..Default::default()
        };
        let err = stage(&raw, &keyed_mapper, &options, |_, _| {
            token.cancel();
            ControlFlow::Continue(())
        })
        .unwrap_err();
        assert_eq!(err, StagingError::Cancelled { done: 4, total: 10 });

        assert!(token.reset());
        assert!(!token.is_cancelled());
        assert!(!token.reset());
        assert!(stage(&raw, &keyed_mapper, &options, |_, _| ControlFlow::Continue(())).is_ok());
    }
}
