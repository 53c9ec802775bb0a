//! Log setup for the binary. Output goes to a daily-rolling file so it never
//! mixes with command output.

use std::path::PathBuf;

use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "STAFFSYNC_LOG";
const LOG_FILE_PREFIX: &str = "staffsync.log";

/// Keeps the background writer alive; drop it last.
pub struct LogGuard {
  _guard: WorkerGuard,
  pub dir: PathBuf,
}

pub fn log_dir() -> Result<PathBuf> {
  dirs::data_dir()
    .map(|dir| dir.join("staffsync").join("logs"))
    .ok_or_else(|| eyre!("Could not determine the data directory for logs"))
}

pub fn init(verbose: bool) -> Result<LogGuard> {
  let default_level = if verbose {
    LevelFilter::DEBUG
  } else {
    LevelFilter::INFO
  };
  let filter = EnvFilter::builder()
    .with_default_directive(default_level.into())
    .with_env_var(LOG_ENV)
    .from_env_lossy();

  let dir = log_dir()?;
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .with_target(true)
    .try_init()
    .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;

  Ok(LogGuard { _guard: guard, dir })
}
