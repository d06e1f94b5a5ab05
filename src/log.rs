//! Structured logging for lanekeeper.
//!
//! Log levels:
//! - ERROR: Failures that abort an operation
//! - WARN: Unexpected but recoverable conditions (retries, stale records)
//! - INFO: Lifecycle transitions, merge milestones
//! - DEBUG: Detailed operation traces (backend calls, store writes)
//! - TRACE: Very detailed traces
//!
//! Debug mode can be enabled with `--debug` or `LANEKEEPER_DEBUG=1`.
//! `LANEKEEPER_LOG` takes an `EnvFilter` directive and overrides both.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

const FILTER_ENV: &str = "LANEKEEPER_LOG";
const DEBUG_ENV: &str = "LANEKEEPER_DEBUG";

/// Initialize logging to ~/.lanekeeper/lanekeeper.log
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging with explicit debug mode setting.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_with_debug(debug: bool) {
    let env_debug = std::env::var(DEBUG_ENV)
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false);
    let default_level = if debug || env_debug { "debug" } else { "info" };

    let filter = EnvFilter::try_from_env(FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(format!("lanekeeper={}", default_level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false);

    // Truncate file on startup
    match log_path().and_then(|path| File::create(path).ok()) {
        Some(file) => {
            let _ = builder.with_writer(Mutex::new(file)).try_init();
        }
        None => {
            let _ = builder.with_writer(std::io::stderr).try_init();
        }
    }
}

fn log_path() -> Option<PathBuf> {
    let dir = dirs::home_dir()?.join(".lanekeeper");
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir.join("lanekeeper.log"))
}
