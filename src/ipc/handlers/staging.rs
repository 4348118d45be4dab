use crate::csv::csv_quote;
use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{
    get_bool, get_opt_str, get_opt_usize, get_required_str, get_usize_list, progress_event,
    require_db, staged_row_json,
};
use crate::ipc::types::{AppState, Notify, Request};
use crate::staging::error::SessionError;
use crate::staging::model::{DuplicatePolicy, StagedRow, StagingResult};
use crate::staging::pipeline::StageOptions;
use crate::staging::session::StagingSession;
use serde_json::{json, Value};
use std::ops::ControlFlow;
use std::path::PathBuf;
use tracing::info;

const DEFAULT_PAGE_SIZE: usize = 100;

fn result_summary(staged: &StagingResult) -> Value {
    json!({
        "runId": staged.run_id,
        "total": staged.len(),
        "validCount": staged.valid_count,
        "errorCount": staged.error_count,
        "duplicateCount": staged.duplicate_count,
    })
}

fn handle_staging_run(
    state: &mut AppState,
    req: &Request,
    notify: &mut Notify<'_>,
) -> Result<Value, HandlerErr> {
    let conn = require_db(&state.db)?;
    let name = get_required_str(&req.params, "profile")?;
    let profile = db::profile_get(conn, &name)
        .map_err(HandlerErr::db)?
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown profile {name}")))?;
    let known = db::known_records(conn, &profile.ido).map_err(HandlerErr::db)?;
    let profile = profile.with_known_records(known);

    let duplicate_policy = match get_opt_str(&req.params, "duplicatePolicy") {
        Some(s) => DuplicatePolicy::parse(&s)
            .ok_or_else(|| HandlerErr::bad_params("duplicatePolicy must be one of: reject, warn"))?,
        None => DuplicatePolicy::default(),
    };
    let options = StageOptions {
        chunk_size: get_opt_usize(&req.params, "chunkSize")?
            .unwrap_or(state.defaults.staging_chunk_size),
        duplicate_policy,
        cancel: Some(state.cancel.clone()),
    };
    let progress = get_bool(&req.params, "progress", false);

    let staged = state.session.stage(&profile, &options, |done, total| {
        if progress {
            notify(progress_event(&req.id, "staging", done, total));
        }
        ControlFlow::Continue(())
    })?;
    let mut summary = result_summary(staged);
    summary["profile"] = json!(profile.name);
    Ok(summary)
}

fn handle_staging_summary(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let staged = state.session.require_staged()?;
    let mut summary = result_summary(staged);
    summary["selection"] = json!(state.session.selection_summary()?);
    summary["filter"] = json!(state.session.filter());
    summary["visibleCount"] = json!(state.session.visible_len());
    Ok(summary)
}

fn current_run<'a>(
    session: &'a StagingSession,
    params: &Value,
) -> Result<&'a StagingResult, SessionError> {
    match get_opt_str(params, "runId") {
        Some(run_id) => session.require_run(&run_id),
        None => session.require_staged(),
    }
}

fn handle_staging_rows(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let session = &state.session;
    let staged = current_run(session, &req.params)?;
    let total = staged.len();

    let rows: Vec<&StagedRow> = if req.params.get("rowIndices").is_some() {
        let indices = get_usize_list(&req.params, "rowIndices")?;
        indices
            .into_iter()
            .map(|row_index| {
                staged
                    .rows
                    .get(row_index)
                    .ok_or(SessionError::RowOutOfRange { row_index, total })
            })
            .collect::<Result<_, _>>()?
    } else {
        let start = get_opt_usize(&req.params, "start")?.unwrap_or(0).min(total);
        let count = get_opt_usize(&req.params, "count")?.unwrap_or(DEFAULT_PAGE_SIZE);
        staged.rows[start..start.saturating_add(count).min(total)]
            .iter()
            .collect()
    };

    let rows: Vec<Value> = rows
        .into_iter()
        .map(|row| staged_row_json(row, session.is_selected(row.row_index)))
        .collect();
    Ok(json!({ "runId": staged.run_id, "total": total, "rows": rows }))
}

/// CSV of every invalid or duplicate row: fixed columns, then the union of
/// raw field names in first-seen order.
fn error_rows_csv(rows: &[&StagedRow]) -> String {
    let mut columns: Vec<&str> = Vec::new();
    for row in rows {
        for key in row.raw.keys() {
            if !columns.contains(&key.as_str()) {
                columns.push(key);
            }
        }
    }

    let mut out = String::new();
    let mut header = vec!["row_index", "is_duplicate", "errors", "warnings"];
    header.extend(columns.iter().copied());
    out.push_str(
        &header
            .iter()
            .map(|h| csv_quote(h))
            .collect::<Vec<_>>()
            .join(","),
    );
    out.push('\n');

    for row in rows {
        let mut fields = vec![
            row.row_index.to_string(),
            row.validation.is_duplicate.to_string(),
            csv_quote(&row.validation.errors.join("; ")),
            csv_quote(&row.validation.warnings.join("; ")),
        ];
        for col in &columns {
            let cell = match row.raw.get(*col) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            };
            fields.push(csv_quote(&cell));
        }
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

fn handle_staging_export_errors(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let out_path = PathBuf::from(get_required_str(&req.params, "outPath")?);
    let staged = current_run(&state.session, &req.params)?;
    let rows: Vec<&StagedRow> = staged
        .rows
        .iter()
        .filter(|r| !r.is_valid() || r.validation.is_duplicate)
        .collect();

    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| HandlerErr::new("export_failed", e.to_string()))?;
    }
    std::fs::write(&out_path, error_rows_csv(&rows))
        .map_err(|e| HandlerErr::new("export_failed", e.to_string()))?;
    info!(
        run_id = %staged.run_id,
        rows = rows.len(),
        path = %out_path.display(),
        "error rows exported"
    );
    Ok(json!({
        "path": out_path.to_string_lossy(),
        "rowsWritten": rows.len(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request, notify: &mut Notify<'_>) -> Option<Value> {
    let result = match req.method.as_str() {
        "staging.run" => handle_staging_run(state, req, notify),
        "staging.summary" => handle_staging_summary(state, req),
        "staging.rows" => handle_staging_rows(state, req),
        "staging.exportErrors" => handle_staging_export_errors(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
