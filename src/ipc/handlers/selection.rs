use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_required_str, get_required_usize, get_usize_list};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

fn summary(state: &AppState) -> Result<Value, HandlerErr> {
    Ok(json!(state.session.selection_summary()?))
}

fn handle_selection_toggle(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let run_id = get_required_str(&req.params, "runId")?;
    let row_index = get_required_usize(&req.params, "rowIndex")?;
    let selected = state.session.toggle(&run_id, row_index)?;
    Ok(json!({
        "rowIndex": row_index,
        "selected": selected,
        "summary": summary(state)?,
    }))
}

fn handle_selection_set(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let run_id = get_required_str(&req.params, "runId")?;
    let row_indices = get_usize_list(&req.params, "rowIndices")?;
    let Some(selected) = req.params.get("selected").and_then(|v| v.as_bool()) else {
        return Err(HandlerErr::bad_params("missing selected"));
    };
    state.session.set_selected(&run_id, &row_indices, selected)?;
    summary(state)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "selection.selectAll" => state
            .session
            .select_all()
            .map_err(HandlerErr::from)
            .and_then(|_| summary(state)),
        "selection.deselectAll" => state
            .session
            .deselect_all()
            .map_err(HandlerErr::from)
            .and_then(|_| summary(state)),
        "selection.invert" => state
            .session
            .invert_selection()
            .map_err(HandlerErr::from)
            .and_then(|_| summary(state)),
        "selection.toggle" => handle_selection_toggle(state, req),
        "selection.set" => handle_selection_set(state, req),
        "selection.summary" => summary(state),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
