use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{
    get_opt_f64, get_opt_usize, get_required_f64, get_required_str, staged_row_json,
};
use crate::ipc::types::{AppState, Request};
use crate::staging::session::ViewFilter;
use crate::staging::viewport::ViewportState;
use serde_json::{json, Value};

fn handle_view_set_filter(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let raw = get_required_str(&req.params, "filter")?;
    let filter = ViewFilter::parse(&raw).ok_or_else(|| {
        HandlerErr::bad_params("filter must be one of: all, valid, errors, duplicates, selected")
    })?;
    let visible = state.session.set_filter(filter)?;
    Ok(json!({ "filter": filter, "visibleCount": visible }))
}

fn viewport_from_params(params: &Value) -> Result<ViewportState, HandlerErr> {
    Ok(ViewportState {
        scroll_offset: get_opt_f64(params, "scrollOffset")?.unwrap_or(0.0),
        row_height: get_required_f64(params, "rowHeight")?,
        viewport_height: get_required_f64(params, "viewportHeight")?,
        overscan: get_opt_usize(params, "overscan")?.unwrap_or(0),
    })
}

fn handle_viewport_window(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let viewport = viewport_from_params(&req.params)?;
    let session = &state.session;
    let (window, rows) = session.window(&viewport)?;
    let rows: Vec<Value> = rows
        .into_iter()
        .map(|row| staged_row_json(row, session.is_selected(row.row_index)))
        .collect();
    Ok(json!({
        "window": window,
        "filter": session.filter(),
        "visibleCount": session.visible_len(),
        "rows": rows,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "view.setFilter" => handle_view_set_filter(state, req),
        "viewport.window" => handle_viewport_window(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
