use crate::db::{self, DbSubmitter};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{
    get_bool, get_opt_str, get_opt_usize, get_required_str, progress_event, require_db,
};
use crate::ipc::types::{AppState, Notify, Request};
use crate::staging::commit::CommitOptions;
use serde_json::{json, Value};
use std::ops::ControlFlow;
use std::time::Duration;
use tracing::warn;

const DEFAULT_RECORDS_LIMIT: usize = 100;

fn handle_commit_run(
    state: &mut AppState,
    req: &Request,
    notify: &mut Notify<'_>,
) -> Result<Value, HandlerErr> {
    let conn = require_db(&state.db)?;
    let run_id = get_required_str(&req.params, "runId")?;
    let ido = match get_opt_str(&req.params, "ido") {
        Some(ido) => ido,
        None => state
            .session
            .loaded()
            .map(|l| l.ido_name.clone())
            .ok_or_else(|| HandlerErr::new("no_rows", "no rows loaded"))?,
    };
    let chunk_timeout = match get_opt_usize(&req.params, "chunkTimeoutMs")? {
        Some(0) => return Err(HandlerErr::bad_params("chunkTimeoutMs must be at least 1")),
        Some(ms) => Duration::from_millis(ms as u64),
        None => state.defaults.chunk_timeout,
    };
    let options = CommitOptions {
        chunk_size: get_opt_usize(&req.params, "chunkSize")?
            .unwrap_or(state.defaults.commit_chunk_size),
        chunk_timeout,
        cancel: Some(state.cancel.clone()),
    };
    let progress = get_bool(&req.params, "progress", false);

    let mut submitter = DbSubmitter::new(conn, ido.clone(), chunk_timeout);
    let result = state
        .session
        .commit(&run_id, &mut submitter, &options, |done, total| {
            if progress {
                notify(progress_event(&req.id, "commit", done, total));
            }
            ControlFlow::Continue(())
        })?;

    // records are already committed at this point
    if let Err(e) = db::record_commit_run(conn, &run_id, &ido, &result) {
        warn!(run_id = %run_id, error = %e, "failed to record commit run");
    }

    let mut out = json!(result);
    out["runId"] = json!(run_id);
    out["ido"] = json!(ido);
    Ok(out)
}

fn handle_records_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(&state.db)?;
    let ido = get_required_str(&req.params, "ido")?;
    let limit = get_opt_usize(&req.params, "limit")?.unwrap_or(DEFAULT_RECORDS_LIMIT);
    let records = db::records_list(conn, &ido, limit).map_err(HandlerErr::db)?;
    Ok(json!({ "ido": ido, "records": records }))
}

pub fn try_handle(state: &mut AppState, req: &Request, notify: &mut Notify<'_>) -> Option<Value> {
    let result = match req.method.as_str() {
        "commit.run" => handle_commit_run(state, req, notify),
        "records.list" => handle_records_list(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
