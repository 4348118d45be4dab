use crate::staging::error::{CommitError, SessionError, StagingError};
use serde_json::{json, Value};

pub fn ok(id: &str, result: Value) -> Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(id: &str, code: &str, message: impl Into<String>, details: Option<Value>) -> Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Error half of a handler result; becomes an `ok: false` response.
#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn db(e: anyhow::Error) -> Self {
        Self::new("db_failed", format!("{e:#}"))
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<SessionError> for HandlerErr {
    fn from(e: SessionError) -> Self {
        let message = e.to_string();
        match e {
            SessionError::NoRows => Self::new("no_rows", message),
            SessionError::NotStaged => Self::new("not_staged", message),
            SessionError::StaleRun { expected, got } => Self::new("stale_run", message)
                .with_details(json!({ "currentRunId": expected, "runId": got })),
            SessionError::RowOutOfRange { row_index, total } => Self::bad_params(message)
                .with_details(json!({ "rowIndex": row_index, "total": total })),
            SessionError::Staging(StagingError::Cancelled { done, total }) => {
                Self::new("cancelled", message)
                    .with_details(json!({ "done": done, "total": total }))
            }
            SessionError::Staging(StagingError::InvalidChunkSize)
            | SessionError::Commit(CommitError::InvalidChunkSize) => Self::bad_params(message),
            SessionError::Commit(CommitError::NoValidSelection) => {
                Self::new("no_valid_selection", message)
            }
        }
    }
}

/// Wraps a handler result into a response line.
pub fn respond(id: &str, result: Result<Value, HandlerErr>) -> Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => e.response(id),
    }
}
