use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportState {
    pub scroll_offset: f64,
    pub row_height: f64,
    pub viewport_height: f64,
    #[serde(default)]
    pub overscan: usize,
}

/// Rows `[start_index, end_index)` to render plus the spacer heights that keep
/// the total scroll height equal to `total_rows * row_height`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Window {
    pub start_index: usize,
    pub end_index: usize,
    pub top_spacer_height: f64,
    pub bottom_spacer_height: f64,
}

impl Window {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start_index..self.end_index
    }
}

const EMPTY: Window = Window {
    start_index: 0,
    end_index: 0,
    top_spacer_height: 0.0,
    bottom_spacer_height: 0.0,
};

/// O(1) in `total_rows`; runs on every scroll event.
pub fn compute_window(viewport: &ViewportState, total_rows: usize) -> Window {
    let row_height = viewport.row_height;
    if total_rows == 0 || !row_height.is_finite() || row_height <= 0.0 {
        return EMPTY;
    }

    let scroll_offset = if viewport.scroll_offset.is_finite() {
        viewport.scroll_offset.max(0.0)
    } else {
        0.0
    };
    let viewport_height = if viewport.viewport_height.is_finite() {
        viewport.viewport_height.max(0.0)
    } else {
        0.0
    };

    // float -> usize casts saturate
    let first_visible = (scroll_offset / row_height).floor() as usize;
    let visible_count = (viewport_height / row_height).ceil() as usize;

    let start_index = first_visible
        .saturating_sub(viewport.overscan)
        .min(total_rows);
    let end_index = start_index
        .saturating_add(visible_count)
        .saturating_add(viewport.overscan.saturating_mul(2))
        .min(total_rows);

    Window {
        start_index,
        end_index,
        top_spacer_height: start_index as f64 * row_height,
        bottom_spacer_height: (total_rows - end_index) as f64 * row_height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn viewport(scroll_offset: f64, overscan: usize) -> ViewportState {
        ViewportState {
            scroll_offset,
            row_height: 32.0,
            viewport_height: 480.0,
            overscan,
        }
    }

    #[test]
    fn top_of_list() {
        let w = compute_window(&viewport(0.0, 5), 100_000);
        assert_eq!(w.start_index, 0);
        assert_eq!(w.end_index, 25);
        assert_eq!(w.top_spacer_height, 0.0);
        assert_eq!(w.bottom_spacer_height, (100_000 - 25) as f64 * 32.0);
    }

    #[test]
    fn middle_of_list_applies_overscan_on_both_sides() {
        // first visible row is 1000
        let w = compute_window(&viewport(32_000.0, 5), 100_000);
        assert_eq!(w.start_index, 995);
        assert_eq!(w.end_index, 995 + 15 + 10);
        assert_eq!(w.top_spacer_height, 995.0 * 32.0);
    }

    #[test]
    fn empty_row_set_has_no_spacers() {
        assert_eq!(compute_window(&viewport(500.0, 3), 0), EMPTY);
    }

    #[test]
    fn scrolling_past_the_end_clamps() {
        let w = compute_window(&viewport(1.0e9, 2), 10);
        assert_eq!(w.start_index, 10);
        assert_eq!(w.end_index, 10);
        assert_eq!(w.top_spacer_height, 320.0);
        assert_eq!(w.bottom_spacer_height, 0.0);
    }

    #[test]
    fn negative_offset_and_bad_row_height() {
        let w = compute_window(&viewport(-250.0, 0), 40);
        assert_eq!(w.start_index, 0);
        assert_eq!(w.end_index, 15);

        let mut v = viewport(0.0, 0);
        v.row_height = 0.0;
        assert_eq!(compute_window(&v, 40), EMPTY);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(512))]

        #[test]
        fn spacers_and_rendered_rows_conserve_total_height(
            scroll_offset in 0.0f64..5.0e6,
            row_height in 1u32..200,
            viewport_height in 0u32..4000,
            overscan in 0usize..50,
            total_rows in 0usize..200_000,
        ) {
            let row_height = row_height as f64;
            let v = ViewportState {
                scroll_offset,
                row_height,
                viewport_height: viewport_height as f64,
                overscan,
            };
            let w = compute_window(&v, total_rows);
            prop_assert!(w.start_index <= w.end_index);
            prop_assert!(w.end_index <= total_rows);
            let rendered = w.range().len() as f64 * row_height;
            let total = w.top_spacer_height + rendered + w.bottom_spacer_height;
            prop_assert_eq!(total, total_rows as f64 * row_height);
        }
    }
}
