use super::commit::{commit, CommitOptions, CommitResult, Submitter};
use super::error::SessionError;
use super::model::{RawRow, StagedRow, StagingResult};
use super::pipeline::{stage, Mapper, StageOptions};
use super::selection::{SelectionMode, SelectionState};
use super::viewport::{compute_window, ViewportState, Window};
use serde::Serialize;
use std::cell::OnceCell;
use std::ops::ControlFlow;

/// Raw rows from one load action.
#[derive(Debug, Clone)]
pub struct LoadedRows {
    pub ido_name: String,
    pub rows: Vec<RawRow>,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewFilter {
    #[default]
    All,
    Valid,
    Errors,
    Duplicates,
    Selected,
}

impl ViewFilter {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Some(Self::All),
            "valid" => Some(Self::Valid),
            "errors" => Some(Self::Errors),
            "duplicates" => Some(Self::Duplicates),
            "selected" => Some(Self::Selected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionSummary {
    pub mode: SelectionMode,
    pub selected_count: usize,
    pub selected_valid_count: usize,
    pub total: usize,
}

/// Owns the loaded rows, the staged rows and the selection over them.
///
/// Every mutator that replaces the row set also resets the selection and the
/// view filter, so a selection can never refer to another run's indices.
#[derive(Debug, Default)]
pub struct StagingSession {
    loaded: Option<LoadedRows>,
    staged: Option<StagingResult>,
    selection: SelectionState,
    filter: ViewFilter,
    // row_index values visible under `filter`, built on first read
    filtered: OnceCell<Vec<usize>>,
}

impl StagingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&mut self, loaded: LoadedRows) {
        self.loaded = Some(loaded);
        self.reset_staged(None);
    }

    pub fn clear(&mut self) {
        self.loaded = None;
        self.reset_staged(None);
    }

    fn reset_staged(&mut self, staged: Option<StagingResult>) {
        self.staged = staged;
        self.selection = SelectionState::default();
        self.filter = ViewFilter::All;
        self.filtered = OnceCell::new();
    }

    pub fn loaded(&self) -> Option<&LoadedRows> {
        self.loaded.as_ref()
    }

    pub fn staged(&self) -> Option<&StagingResult> {
        self.staged.as_ref()
    }

    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    pub fn filter(&self) -> ViewFilter {
        self.filter
    }

    /// Stages the loaded rows. The previous staged rows and selection are
    /// replaced only when the run completes.
    pub fn stage<M, P>(
        &mut self,
        mapper: &M,
        options: &StageOptions,
        on_progress: P,
    ) -> Result<&StagingResult, SessionError>
    where
        M: Mapper + ?Sized,
        P: FnMut(usize, usize) -> ControlFlow<()>,
    {
        let loaded = self.loaded.as_ref().ok_or(SessionError::NoRows)?;
        let result = stage(&loaded.rows, mapper, options, on_progress)?;
        self.reset_staged(Some(result));
        self.staged.as_ref().ok_or(SessionError::NotStaged)
    }

    pub fn require_staged(&self) -> Result<&StagingResult, SessionError> {
        self.staged.as_ref().ok_or(SessionError::NotStaged)
    }

    /// The current staging result, provided `run_id` names it.
    pub fn require_run(&self, run_id: &str) -> Result<&StagingResult, SessionError> {
        let staged = self.require_staged()?;
        if staged.run_id != run_id {
            return Err(SessionError::StaleRun {
                expected: staged.run_id.clone(),
                got: run_id.to_string(),
            });
        }
        Ok(staged)
    }

    pub fn select_all(&mut self) -> Result<(), SessionError> {
        self.require_staged()?;
        self.selection.select_all();
        self.selection_changed();
        Ok(())
    }

    pub fn deselect_all(&mut self) -> Result<(), SessionError> {
        self.require_staged()?;
        self.selection.deselect_all();
        self.selection_changed();
        Ok(())
    }

    pub fn invert_selection(&mut self) -> Result<(), SessionError> {
        self.require_staged()?;
        self.selection.invert();
        self.selection_changed();
        Ok(())
    }

    /// Flips one row and returns its new membership. No-op on an empty run.
    pub fn toggle(&mut self, run_id: &str, row_index: usize) -> Result<bool, SessionError> {
        let total = self.require_run(run_id)?.len();
        if total == 0 {
            return Ok(false);
        }
        if row_index >= total {
            return Err(SessionError::RowOutOfRange { row_index, total });
        }
        self.selection.toggle(row_index);
        self.selection_changed();
        Ok(self.selection.is_selected(row_index))
    }

    pub fn set_selected(
        &mut self,
        run_id: &str,
        row_indices: &[usize],
        selected: bool,
    ) -> Result<(), SessionError> {
        let total = self.require_run(run_id)?.len();
        if let Some(&row_index) = row_indices.iter().find(|&&i| i >= total) {
            return Err(SessionError::RowOutOfRange { row_index, total });
        }
        self.selection.set_many(row_indices.iter().copied(), selected);
        self.selection_changed();
        Ok(())
    }

    pub fn is_selected(&self, row_index: usize) -> bool {
        self.selection.is_selected(row_index)
    }

    pub fn selection_summary(&self) -> Result<SelectionSummary, SessionError> {
        let staged = self.require_staged()?;
        Ok(SelectionSummary {
            mode: self.selection.mode(),
            selected_count: self.selection.selected_count(staged.len()),
            selected_valid_count: self.selection.selected_valid_count(&staged.rows),
            total: staged.len(),
        })
    }

    /// Applies a view filter and returns how many rows it shows.
    pub fn set_filter(&mut self, filter: ViewFilter) -> Result<usize, SessionError> {
        self.require_staged()?;
        self.filter = filter;
        self.filtered = OnceCell::new();
        Ok(self.visible_len())
    }

    // Only marks the `selected` view stale; the next read rebuilds it.
    fn selection_changed(&mut self) {
        if self.filter == ViewFilter::Selected {
            self.filtered.take();
        }
    }

    /// `row_index` values the current filter shows, or None when it shows
    /// every row. Scans the rows at most once per filter or selection change.
    fn visible_indices(&self) -> Option<&[usize]> {
        let staged = self.staged.as_ref()?;
        if self.filter == ViewFilter::All {
            return None;
        }
        Some(
            self.filtered
                .get_or_init(|| filtered_indices(staged, &self.selection, self.filter))
                .as_slice(),
        )
    }

    /// Number of rows the current view filter shows.
    pub fn visible_len(&self) -> usize {
        match (self.visible_indices(), &self.staged) {
            (Some(indices), _) => indices.len(),
            (None, Some(staged)) => staged.len(),
            (None, None) => 0,
        }
    }

    /// Window for `viewport` over the filtered view, with the rows it covers.
    pub fn window(
        &self,
        viewport: &ViewportState,
    ) -> Result<(Window, Vec<&StagedRow>), SessionError> {
        let staged = self.require_staged()?;
        let window = compute_window(viewport, self.visible_len());
        let rows = match self.visible_indices() {
            Some(indices) => indices[window.range()]
                .iter()
                .filter_map(|&i| staged.rows.get(i))
                .collect(),
            None => staged.rows[window.range()].iter().collect(),
        };
        Ok((window, rows))
    }

    /// Commits the selected valid rows of run `run_id`. The session is left
    /// as is; callers clear it when they are done with the run.
    pub fn commit<S, P>(
        &self,
        run_id: &str,
        submitter: &mut S,
        options: &CommitOptions,
        on_progress: P,
    ) -> Result<CommitResult, SessionError>
    where
        S: Submitter + ?Sized,
        P: FnMut(usize, usize) -> ControlFlow<()>,
    {
        let staged = self.require_run(run_id)?;
        Ok(commit(
            &staged.rows,
            &self.selection,
            submitter,
            options,
            on_progress,
        )?)
    }
}

fn filtered_indices(
    staged: &StagingResult,
    selection: &SelectionState,
    filter: ViewFilter,
) -> Vec<usize> {
    let keep = |r: &StagedRow| match filter {
        ViewFilter::All => true,
        ViewFilter::Valid => r.validation.is_valid,
        ViewFilter::Errors => !r.validation.is_valid,
        ViewFilter::Duplicates => r.validation.is_duplicate,
        ViewFilter::Selected => selection.is_selected(r.row_index),
    };
    staged
        .rows
        .iter()
        .filter(|r| keep(r))
        .map(|r| r.row_index)
        .collect()
}
