use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_required_str, require_db};
use crate::ipc::types::{AppState, Request};
use crate::staging::mapping::MappingProfile;
use serde_json::{json, Value};

fn handle_profiles_list(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(&state.db)?;
    let profiles = db::profiles_list(conn).map_err(HandlerErr::db)?;
    Ok(json!({ "profiles": profiles }))
}

fn handle_profiles_upsert(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(&state.db)?;
    let Some(raw) = req.params.get("profile") else {
        return Err(HandlerErr::bad_params("missing profile"));
    };
    let profile: MappingProfile = serde_json::from_value(raw.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid profile: {e}")))?;
    profile
        .validate()
        .map_err(|e| HandlerErr::bad_params(format!("{e:#}")))?;
    db::profile_upsert(conn, &profile).map_err(HandlerErr::db)?;
    Ok(json!({ "name": profile.name }))
}

fn handle_profiles_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(&state.db)?;
    let name = get_required_str(&req.params, "name")?;
    let deleted = db::profile_delete(conn, &name).map_err(HandlerErr::db)?;
    Ok(json!({ "deleted": deleted }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "profiles.list" => handle_profiles_list(state, req),
        "profiles.upsert" => handle_profiles_upsert(state, req),
        "profiles.delete" => handle_profiles_delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
