use crate::db;
use crate::ipc::error::{ok, respond, HandlerErr};
use crate::ipc::helpers::{get_opt_i64, get_opt_str, get_str_list, require_db, require_workspace};
use crate::ipc::types::{AppState, Request};
use crate::source::{QueryError, RowQuery, RowSource, WorkspaceFileSource};
use crate::staging::model::RawRow;
use crate::staging::session::LoadedRows;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::info;

fn rows_fingerprint(rows: &[RawRow]) -> Result<String, HandlerErr> {
    let bytes = serde_json::to_vec(rows)
        .map_err(|e| HandlerErr::new("source_failed", format!("rows are not serializable: {e}")))?;
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

fn build_query(state: &AppState, params: &Value) -> Result<RowQuery, HandlerErr> {
    let mut properties = get_str_list(params, "properties")?;
    let ido_name = match (get_opt_str(params, "idoName"), get_opt_str(params, "profile")) {
        (Some(ido), _) => ido,
        (None, Some(profile_name)) => {
            let conn = require_db(&state.db)?;
            let profile = db::profile_get(conn, &profile_name)
                .map_err(HandlerErr::db)?
                .ok_or_else(|| HandlerErr::bad_params(format!("unknown profile {profile_name}")))?;
            if properties.is_empty() {
                properties = profile.source_properties();
            }
            profile.ido
        }
        (None, None) => return Err(HandlerErr::bad_params("missing idoName")),
    };
    let mut query = RowQuery::all(ido_name);
    query.properties = properties;
    query.filter = get_opt_str(params, "filter");
    query.order_by = get_opt_str(params, "orderBy");
    if let Some(limit) = get_opt_i64(params, "limit")? {
        query.limit = limit;
    }
    Ok(query)
}

fn handle_rows_load(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let workspace = require_workspace(&state.workspace)?;
    let source = WorkspaceFileSource::new(workspace);
    let query = build_query(state, &req.params)?;

    let rows = source.fetch_raw_rows(&query).map_err(|e| {
        if let Some(q) = e.downcast_ref::<QueryError>() {
            HandlerErr::bad_params(q.to_string())
        } else {
            HandlerErr::new("source_failed", format!("{e:#}"))
        }
    })?;
    let fingerprint = rows_fingerprint(&rows)?;
    let row_count = rows.len();
    info!(ido = %query.ido_name, rows = row_count, "rows loaded");

    state.session.load(LoadedRows {
        ido_name: query.ido_name.clone(),
        rows,
        fingerprint: fingerprint.clone(),
    });
    Ok(json!({
        "idoName": query.ido_name,
        "rowCount": row_count,
        "fingerprint": fingerprint,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "rows.load" => Some(respond(&req.id, handle_rows_load(state, req))),
        "session.clear" => {
            state.session.clear();
            Some(ok(&req.id, json!({ "cleared": true })))
        }
        _ => None,
    }
}
