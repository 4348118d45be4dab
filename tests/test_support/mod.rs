#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_stagingd");
    let mut child = Command::new(exe)
        .env_remove("STAGINGD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn stagingd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

/// Writes `sources/<ido>.json` in `workspace`.
pub fn write_extract(workspace: &Path, ido: &str, rows: Value) {
    let dir = workspace.join("sources");
    std::fs::create_dir_all(&dir).expect("create sources dir");
    std::fs::write(dir.join(format!("{ido}.json")), rows.to_string()).expect("write extract");
}

pub fn read_json_line(reader: &mut BufReader<ChildStdout>, method: &str) -> Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    serde_json::from_str(line.trim()).expect("parse response json")
}

/// Writes `line` verbatim and returns the next response line.
pub fn send_raw(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, line: &str) -> Value {
    writeln!(stdin, "{}", line).expect("write request");
    stdin.flush().expect("flush request");
    read_json_line(reader, line)
}

/// Sends one request and returns the progress events written before the
/// response, then the response itself.
pub fn request_with_events(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> (Vec<Value>, Value) {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut events = Vec::new();
    loop {
        let value = read_json_line(reader, method);
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
        if value.get("event").is_some() {
            events.push(value);
            continue;
        }
        if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
            let code = value
                .get("error")
                .and_then(|e| e.get("code"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            assert_ne!(
                code, "not_implemented",
                "unexpected unknown method for {}",
                method
            );
        }
        return (events, value);
    }
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    request_with_events(stdin, reader, id, method, params).1
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(Value::Null)
}

/// Asserts the request fails with `code`.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
    code: &str,
) -> Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    assert_eq!(
        value.pointer("/error/code").and_then(|v| v.as_str()),
        Some(code),
        "{}: {}",
        method,
        value
    );
    value
}

/// Item master profile used across the sidecar tests.
pub fn items_profile() -> Value {
    json!({
        "name": "items",
        "ido": "SLItems",
        "fields": [
            { "source": "Item", "target": "item", "required": true, "maxLen": 30 },
            { "source": "Description", "target": "description", "required": true },
            { "source": "Qty", "target": "qty", "kind": "integer" },
            { "source": "UM", "target": "um", "default": "EA" }
        ],
        "keyFields": ["item"]
    })
}

/// Five item rows: 0 and 3 valid, 1 bad quantity, 2 repeats row 0's key,
/// 4 has no description.
pub fn item_rows() -> Value {
    json!([
        { "Item": "P1", "Description": "Bracket", "Qty": "5" },
        { "Item": "P2", "Description": "Pipe", "Qty": "abc" },
        { "Item": "p1 ", "Description": "Bracket again", "Qty": "3" },
        { "Item": "P3", "Description": "Valve", "Qty": 2 },
        { "Item": "P4", "Description": "", "Qty": "1" }
    ])
}

/// Selects a fresh workspace seeded with the item extract and profile.
pub fn seeded_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    prefix: &str,
) -> PathBuf {
    let workspace = temp_dir(prefix);
    write_extract(&workspace, "SLItems", item_rows());
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "profile",
        "profiles.upsert",
        json!({ "profile": items_profile() }),
    );
    workspace
}
