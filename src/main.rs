mod config;
mod csv;
mod db;
mod ipc;
mod source;
mod staging;

use clap::Parser;
use config::Args;
use staging::pipeline::CancelToken;
use std::io::{self, BufRead, Write};
use std::sync::mpsc;
use std::thread;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn write_line(out: &mut impl Write, value: &serde_json::Value) {
    let _ = writeln!(
        out,
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{\"ok\":false}".to_string())
    );
    let _ = out.flush();
}

fn is_cancel_request(line: &str) -> bool {
    serde_json::from_str::<ipc::Request>(line)
        .map(|req| req.method == ipc::CANCEL_METHOD)
        .unwrap_or(false)
}

/// Reads request lines on a separate thread so a cancel request is seen while
/// a staging or commit run is still going.
fn spawn_stdin_reader(cancel: CancelToken) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if is_cancel_request(&line) {
                cancel.cancel();
            }
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn main() {
    let args = Args::parse();

    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("stagingd={}", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let cancel = CancelToken::new();
    let mut state = ipc::AppState::new(args.engine_defaults(), cancel.clone());
    if let Some(path) = args.workspace.as_ref() {
        match db::open_db(path) {
            Ok(conn) => {
                state.workspace = Some(path.clone());
                state.db = Some(conn);
            }
            Err(e) => {
                error!(workspace = %path.display(), "failed to open workspace: {e:#}");
                std::process::exit(1);
            }
        }
    }
    info!(
        version = env!("CARGO_PKG_VERSION"),
        workspace = ?state.workspace,
        "stagingd ready"
    );

    let requests = spawn_stdin_reader(cancel);
    let mut stdout = io::stdout();

    for line in requests {
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                write_line(
                    &mut stdout,
                    &serde_json::json!({
                        "ok": false,
                        "error": { "code": "bad_json", "message": e.to_string() }
                    }),
                );
                continue;
            }
        };
        debug!(id = %req.id, method = %req.method, "request");

        let resp = {
            let mut notify = |event: serde_json::Value| write_line(&mut stdout, &event);
            ipc::handle_request(&mut state, req, &mut notify)
        };
        write_line(&mut stdout, &resp);
    }
    info!("stdin closed, exiting");
}
