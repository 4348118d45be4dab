use crate::ipc::error::HandlerErr;
use crate::staging::model::StagedRow;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_opt_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn get_opt_usize(params: &Value, key: &str) -> Result<Option<usize>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| {
                HandlerErr::bad_params(format!("{} must be a non-negative integer", key))
            }),
    }
}

pub fn get_required_usize(params: &Value, key: &str) -> Result<usize, HandlerErr> {
    get_opt_usize(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_opt_i64(params: &Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", key))),
    }
}

pub fn get_opt_f64(params: &Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number", key))),
    }
}

pub fn get_required_f64(params: &Value, key: &str) -> Result<f64, HandlerErr> {
    get_opt_f64(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_bool(params: &Value, key: &str, default: bool) -> bool {
    params.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

pub fn get_str_list(params: &Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    let Some(v) = params.get(key).filter(|v| !v.is_null()) else {
        return Ok(Vec::new());
    };
    let Some(items) = v.as_array() else {
        return Err(HandlerErr::bad_params(format!("{} must be an array of strings", key)));
    };
    items
        .iter()
        .map(|item| {
            item.as_str().map(|s| s.trim().to_string()).ok_or_else(|| {
                HandlerErr::bad_params(format!("{} must be an array of strings", key))
            })
        })
        .collect()
}

pub fn get_usize_list(params: &Value, key: &str) -> Result<Vec<usize>, HandlerErr> {
    let Some(items) = params.get(key).and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params(format!("missing {}", key)));
    };
    items
        .iter()
        .map(|item| {
            item.as_u64().map(|n| n as usize).ok_or_else(|| {
                HandlerErr::bad_params(format!("{} must be an array of row indices", key))
            })
        })
        .collect()
}

pub fn require_db(db: &Option<Connection>) -> Result<&Connection, HandlerErr> {
    db.as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn require_workspace(workspace: &Option<PathBuf>) -> Result<&Path, HandlerErr> {
    workspace
        .as_deref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn staged_row_json(row: &StagedRow, selected: bool) -> Value {
    json!({
        "rowIndex": row.row_index,
        "raw": row.raw,
        "mapped": row.mapped,
        "validation": row.validation,
        "matchedReferenceId": row.matched_reference_id,
        "isSelected": selected,
    })
}

pub fn progress_event(id: &str, phase: &str, done: usize, total: usize) -> Value {
    json!({
        "id": id,
        "event": "progress",
        "phase": phase,
        "done": done,
        "total": total,
    })
}
