//! Process configuration from CLI flags and environment variables.

use crate::staging::commit::{DEFAULT_CHUNK_TIMEOUT, DEFAULT_COMMIT_CHUNK_SIZE};
use crate::staging::pipeline::DEFAULT_STAGING_CHUNK_SIZE;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Staged-row review sidecar for ERP imports.
///
/// Reads one JSON request per line on stdin and writes one JSON response per
/// line on stdout. Logs go to stderr.
#[derive(Parser, Debug, Clone)]
#[command(name = "stagingd")]
#[command(about = "Staged-row review sidecar for ERP imports")]
pub struct Args {
    /// Workspace directory to open at startup
    #[arg(long, env = "STAGINGD_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Rows per staging chunk
    #[arg(long, env = "STAGINGD_STAGING_CHUNK_SIZE", default_value_t = DEFAULT_STAGING_CHUNK_SIZE)]
    pub staging_chunk_size: usize,

    /// Rows per commit chunk
    #[arg(long, env = "STAGINGD_COMMIT_CHUNK_SIZE", default_value_t = DEFAULT_COMMIT_CHUNK_SIZE)]
    pub commit_chunk_size: usize,

    /// Deadline for one commit chunk, in milliseconds
    #[arg(
        long,
        env = "STAGINGD_CHUNK_TIMEOUT_MS",
        default_value_t = DEFAULT_CHUNK_TIMEOUT.as_millis() as u64
    )]
    pub chunk_timeout_ms: u64,
}

/// Defaults applied when a request does not carry its own values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineDefaults {
    pub staging_chunk_size: usize,
    pub commit_chunk_size: usize,
    pub chunk_timeout: Duration,
}

impl Default for EngineDefaults {
    fn default() -> Self {
        Self {
            staging_chunk_size: DEFAULT_STAGING_CHUNK_SIZE,
            commit_chunk_size: DEFAULT_COMMIT_CHUNK_SIZE,
            chunk_timeout: DEFAULT_CHUNK_TIMEOUT,
        }
    }
}

impl Args {
    pub fn validate(&self) -> Result<(), String> {
        if self.staging_chunk_size == 0 {
            return Err("STAGINGD_STAGING_CHUNK_SIZE must be at least 1".to_string());
        }
        if self.commit_chunk_size == 0 {
            return Err("STAGINGD_COMMIT_CHUNK_SIZE must be at least 1".to_string());
        }
        if self.chunk_timeout_ms == 0 {
            return Err("STAGINGD_CHUNK_TIMEOUT_MS must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn engine_defaults(&self) -> EngineDefaults {
        EngineDefaults {
            staging_chunk_size: self.staging_chunk_size,
            commit_chunk_size: self.commit_chunk_size,
            chunk_timeout: Duration::from_millis(self.chunk_timeout_ms),
        }
    }
}
