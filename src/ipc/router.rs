use super::handlers;
use super::types::{AppState, Notify, Request};
use crate::ipc::error::err;

pub fn handle_request(
    state: &mut AppState,
    req: Request,
    notify: &mut Notify<'_>,
) -> serde_json::Value {
    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::profiles::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::rows::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::staging::try_handle(state, &req, notify) {
        return resp;
    }
    if let Some(resp) = handlers::selection::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::view::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::commit::try_handle(state, &req, notify) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
