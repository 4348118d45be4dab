use crate::staging::commit::{CommitBatchResult, CommitResult, Submitter};
use crate::staging::error::SubmitError;
use crate::staging::mapping::MappingProfile;
use crate::staging::model::MappedRow;
use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

pub const DB_FILE: &str = "stagingd.sqlite3";
const PROFILE_PREFIX: &str = "profiles.";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS records(
            id TEXT PRIMARY KEY,
            ido TEXT NOT NULL,
            record_key TEXT,
            key_normalized TEXT,
            payload_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(ido, key_normalized)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_records_ido ON records(ido)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS commit_runs(
            id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL,
            ido TEXT NOT NULL,
            created INTEGER NOT NULL,
            updated INTEGER NOT NULL,
            skipped INTEGER NOT NULL,
            errors INTEGER NOT NULL,
            outcome TEXT NOT NULL,
            finished_at TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

fn now_string() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn normalize_key(s: &str) -> String {
    s.trim().to_ascii_lowercase()
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    raw.map(|s| serde_json::from_str(&s).with_context(|| format!("corrupt setting {key}")))
        .transpose()
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn profiles_list(conn: &Connection) -> anyhow::Result<Vec<MappingProfile>> {
    let mut stmt = conn.prepare(
        "SELECT key, value_json FROM settings WHERE key LIKE 'profiles.%' ORDER BY key",
    )?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(key, json)| {
            serde_json::from_str(&json).with_context(|| format!("corrupt profile {key}"))
        })
        .collect()
}

pub fn profile_get(conn: &Connection, name: &str) -> anyhow::Result<Option<MappingProfile>> {
    let Some(value) = settings_get_json(conn, &format!("{PROFILE_PREFIX}{name}"))? else {
        return Ok(None);
    };
    Ok(Some(
        serde_json::from_value(value).with_context(|| format!("corrupt profile {name}"))?,
    ))
}

pub fn profile_upsert(conn: &Connection, profile: &MappingProfile) -> anyhow::Result<()> {
    profile.validate()?;
    settings_set_json(
        conn,
        &format!("{PROFILE_PREFIX}{}", profile.name),
        &serde_json::to_value(profile)?,
    )
}

pub fn profile_delete(conn: &Connection, name: &str) -> anyhow::Result<bool> {
    let n = conn.execute(
        "DELETE FROM settings WHERE key = ?",
        [format!("{PROFILE_PREFIX}{name}")],
    )?;
    Ok(n > 0)
}

/// Normalized record key -> record id for every keyed record of `ido`.
pub fn known_records(conn: &Connection, ido: &str) -> anyhow::Result<HashMap<String, String>> {
    let mut stmt = conn.prepare(
        "SELECT key_normalized, id FROM records WHERE ido = ? AND key_normalized IS NOT NULL",
    )?;
    let pairs = stmt
        .query_map([ido], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(pairs)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordRow {
    pub id: String,
    pub record_key: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
}

pub fn records_list(conn: &Connection, ido: &str, limit: usize) -> anyhow::Result<Vec<RecordRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, record_key, payload_json, created_at, updated_at
         FROM records WHERE ido = ? ORDER BY created_at, rowid LIMIT ?",
    )?;
    let rows = stmt
        .query_map((ido, limit as i64), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, Option<String>>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(id, record_key, payload, created_at, updated_at)| {
            Ok(RecordRow {
                payload: serde_json::from_str(&payload)
                    .with_context(|| format!("corrupt payload for record {id}"))?,
                id,
                record_key,
                created_at,
                updated_at,
            })
        })
        .collect()
}

pub fn record_commit_run(
    conn: &Connection,
    run_id: &str,
    ido: &str,
    result: &CommitResult,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO commit_runs(id, run_id, ido, created, updated, skipped, errors, outcome, finished_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            run_id,
            ido,
            result.created_count as i64,
            result.updated_count as i64,
            result.skipped_count as i64,
            result.error_count as i64,
            result.outcome.as_str(),
            now_string(),
        ),
    )?;
    Ok(())
}

/// Upserts mapped rows into `records`, one transaction per chunk.
pub struct DbSubmitter<'a> {
    conn: &'a Connection,
    ido: String,
    // configured per-chunk timeout, reported in SubmitError::Timeout
    chunk_timeout: Duration,
}

impl<'a> DbSubmitter<'a> {
    pub fn new(conn: &'a Connection, ido: impl Into<String>, chunk_timeout: Duration) -> Self {
        Self {
            conn,
            ido: ido.into(),
            chunk_timeout,
        }
    }

    fn upsert(&self, row: &MappedRow, now: &str) -> rusqlite::Result<Upserted> {
        let payload = serde_json::Value::Object(row.fields.clone()).to_string();
        let Some(key) = row.record_key.as_deref() else {
            self.insert(None, &payload, now)?;
            return Ok(Upserted::Created);
        };
        let normalized = normalize_key(key);
        let existing: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT id, payload_json FROM records WHERE ido = ? AND key_normalized = ?",
                (&self.ido, &normalized),
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        match existing {
            None => {
                self.insert(Some(key), &payload, now)?;
                Ok(Upserted::Created)
            }
            Some((_, old)) if old == payload => Ok(Upserted::Skipped),
            Some((id, _)) => {
                self.conn.execute(
                    "UPDATE records SET record_key = ?, payload_json = ?, updated_at = ? WHERE id = ?",
                    (key, &payload, now, &id),
                )?;
                Ok(Upserted::Updated)
            }
        }
    }

    fn insert(&self, key: Option<&str>, payload: &str, now: &str) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO records(id, ido, record_key, key_normalized, payload_json, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &self.ido,
                key,
                key.map(normalize_key),
                payload,
                now,
                now,
            ),
        )?;
        Ok(())
    }
}

enum Upserted {
    Created,
    Updated,
    Skipped,
}

impl Submitter for DbSubmitter<'_> {
    fn submit(
        &mut self,
        rows: &[&MappedRow],
        deadline: Instant,
    ) -> Result<CommitBatchResult, SubmitError> {
        let backend = |e: rusqlite::Error| SubmitError::Backend(e.to_string());
        let remaining = deadline.saturating_duration_since(Instant::now());
        self.conn.busy_timeout(remaining).map_err(backend)?;

        let tx = self.conn.unchecked_transaction().map_err(backend)?;
        let now = now_string();
        let mut batch = CommitBatchResult::default();
        for row in rows {
            if Instant::now() > deadline {
                // dropping `tx` rolls the chunk back
                return Err(SubmitError::Timeout(self.chunk_timeout));
            }
            match self.upsert(row, &now) {
                Ok(Upserted::Created) => batch.created += 1,
                Ok(Upserted::Updated) => batch.updated += 1,
                Ok(Upserted::Skipped) => batch.skipped += 1,
                Err(e) => {
                    debug!(
                        ido = %self.ido,
                        key = ?row.record_key,
                        error = %e,
                        "record upsert failed"
                    );
                    batch.errors += 1;
                }
            }
        }
        tx.commit().map_err(backend)?;
        Ok(batch)
    }
}
