use super::model::StagedRow;
use serde::Serialize;
use std::collections::HashSet;

/// Selection over one staged row set, stored relative to "everything" or
/// "nothing" so that a toggle never touches more than one index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionState {
    /// Every row is selected except these.
    AllExcept(HashSet<usize>),
    /// No row is selected except these.
    OnlyIncluding(HashSet<usize>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SelectionMode {
    AllExcept,
    OnlyIncluding,
}

impl Default for SelectionState {
    fn default() -> Self {
        SelectionState::AllExcept(HashSet::new())
    }
}

impl SelectionState {
    pub fn select_all(&mut self) {
        *self = SelectionState::AllExcept(HashSet::new());
    }

    pub fn deselect_all(&mut self) {
        *self = SelectionState::OnlyIncluding(HashSet::new());
    }

    pub fn toggle(&mut self, row_index: usize) {
        let set = match self {
            SelectionState::AllExcept(set) | SelectionState::OnlyIncluding(set) => set,
        };
        if !set.remove(&row_index) {
            set.insert(row_index);
        }
    }

    /// Selects or deselects each index without looking at any other row.
    pub fn set_many<I>(&mut self, indices: I, selected: bool)
    where
        I: IntoIterator<Item = usize>,
    {
        match self {
            SelectionState::AllExcept(excluded) => {
                for i in indices {
                    if selected {
                        excluded.remove(&i);
                    } else {
                        excluded.insert(i);
                    }
                }
            }
            SelectionState::OnlyIncluding(included) => {
                for i in indices {
                    if selected {
                        included.insert(i);
                    } else {
                        included.remove(&i);
                    }
                }
            }
        }
    }

    /// Flips every row's membership by swapping the variant.
    pub fn invert(&mut self) {
        let taken = std::mem::take(self);
        *self = match taken {
            SelectionState::AllExcept(set) => SelectionState::OnlyIncluding(set),
            SelectionState::OnlyIncluding(set) => SelectionState::AllExcept(set),
        };
    }

    pub fn is_selected(&self, row_index: usize) -> bool {
        match self {
            SelectionState::AllExcept(excluded) => !excluded.contains(&row_index),
            SelectionState::OnlyIncluding(included) => included.contains(&row_index),
        }
    }

    pub fn mode(&self) -> SelectionMode {
        match self {
            SelectionState::AllExcept(_) => SelectionMode::AllExcept,
            SelectionState::OnlyIncluding(_) => SelectionMode::OnlyIncluding,
        }
    }

    /// Number of selected rows among `0..total`.
    pub fn selected_count(&self, total: usize) -> usize {
        match self {
            SelectionState::AllExcept(excluded) => {
                total - excluded.iter().filter(|&&i| i < total).count()
            }
            SelectionState::OnlyIncluding(included) => {
                included.iter().filter(|&&i| i < total).count()
            }
        }
    }

    pub fn selected_valid_count(&self, rows: &[StagedRow]) -> usize {
        match self {
            SelectionState::AllExcept(excluded) => {
                let valid = rows.iter().filter(|r| r.is_valid()).count();
                let excluded_valid = excluded
                    .iter()
                    .filter(|&&i| rows.get(i).is_some_and(StagedRow::is_valid))
                    .count();
                valid - excluded_valid
            }
            SelectionState::OnlyIncluding(included) => included
                .iter()
                .filter(|&&i| rows.get(i).is_some_and(StagedRow::is_valid))
                .count(),
        }
    }

    /// Concrete selected rows in `row_index` order. Commit-time only.
    pub fn materialize<'a>(&self, rows: &'a [StagedRow]) -> Vec<&'a StagedRow> {
        match self {
            SelectionState::AllExcept(excluded) => rows
                .iter()
                .filter(|r| !excluded.contains(&r.row_index))
                .collect(),
            SelectionState::OnlyIncluding(included) => {
                let mut picked: Vec<&StagedRow> =
                    included.iter().filter_map(|&i| rows.get(i)).collect();
                picked.sort_by_key(|r| r.row_index);
                picked
            }
        }
    }
}
