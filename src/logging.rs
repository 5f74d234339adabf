use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::constants::constants;

/// Directory the log file is written to.
pub fn log_dir() -> PathBuf {
  ProjectDirs::from("", "", "playudev")
    .map(|dirs| dirs.data_local_dir().to_path_buf())
    .unwrap_or_else(std::env::temp_dir)
}

/// Initialize tracing with a file writer.
///
/// Logs never go to the terminal, which belongs to the capture surface and the player.
/// `RUST_LOG` overrides the default filter. The returned guard must be held until exit
/// so buffered lines are flushed.
pub fn init_logging(verbose: bool) -> Result<WorkerGuard> {
  let default_filter = if verbose { "playudev=debug" } else { "playudev=info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

  let dir = log_dir();
  std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create log directory {}", dir.display()))?;
  let file_appender = tracing_appender::rolling::never(&dir, &constants().log_file);
  let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(non_blocking).with_ansi(false).with_target(true))
    .try_init()
    .context("Failed to install tracing subscriber")?;

  Ok(guard)
}
