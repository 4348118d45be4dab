use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request, CANCEL_METHOD};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    let loaded = state.session.loaded();
    let staged = state.session.staged();
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "session": {
                "idoName": loaded.map(|l| l.ido_name.clone()),
                "loadedRows": loaded.map(|l| l.rows.len()).unwrap_or(0),
                "fingerprint": loaded.map(|l| l.fingerprint.clone()),
                "runId": staged.map(|s| s.run_id.clone()),
                "stagedRows": staged.map(|s| s.len()).unwrap_or(0),
            }
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            info!(workspace = %path.display(), "workspace selected");
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            // loaded rows belong to the previous workspace
            state.session.clear();
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_failed", format!("{e:#}"), None),
    }
}

// The flag only applies to runs queued ahead of this request.
fn handle_run_cancel(state: &mut AppState, req: &Request) -> serde_json::Value {
    let was_set = state.cancel.reset();
    ok(&req.id, json!({ "cancelRequested": was_set }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        m if m == CANCEL_METHOD => Some(handle_run_cancel(state, req)),
        _ => None,
    }
}
