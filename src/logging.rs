use std::fs::OpenOptions;
use std::path::Path;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_FILE_NAME: &str = "mailboard.log";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,mailboard=debug"))
}

/// Install the global subscriber. Logs go to `mailboard.log` in `log_dir`
/// when it can be opened, to stderr otherwise. Fails if a subscriber is
/// already installed.
pub fn setup_logging(log_dir: Option<&Path>) -> Result<()> {
    let log_file = log_dir.map(|dir| dir.join(LOG_FILE_NAME)).and_then(|path| {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .ok()
    });

    if let Some(file) = log_file {
        tracing_subscriber::registry()
            .with(env_filter())
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false),
            )
            .try_init()
            .context("Failed to install file logger")
    } else {
        // Fallback to stderr if file logging fails
        tracing_subscriber::registry()
            .with(env_filter())
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .context("Failed to install stderr logger")
    }
}
