use crate::config::EngineDefaults;
use crate::staging::pipeline::CancelToken;
use crate::staging::session::StagingSession;
use rusqlite::Connection;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub session: StagingSession,
    pub defaults: EngineDefaults,
    /// Raised by the stdin reader when a cancel request arrives.
    pub cancel: CancelToken,
}

impl AppState {
    pub fn new(defaults: EngineDefaults, cancel: CancelToken) -> Self {
        Self {
            workspace: None,
            db: None,
            session: StagingSession::new(),
            defaults,
            cancel,
        }
    }
}

/// Method that aborts staging and commit runs queued ahead of it.
pub const CANCEL_METHOD: &str = "run.cancel";

/// Sink for notification lines written ahead of a request's response.
pub type Notify<'a> = dyn FnMut(serde_json::Value) + 'a;
