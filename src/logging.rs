//! Subscriber setup for embedders that don't install their own.

use std::path::Path;

use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

const LOG_FILE_PREFIX: &str = "shellcache.log";

/// Install a global fmt subscriber filtered by `config.filter`.
///
/// With a log directory set, output goes to a daily-rotated
/// `shellcache.log` there and the returned guard must be kept alive to
/// flush it.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_new(&config.filter)
    .map_err(|e| eyre!("Invalid log filter {:?}: {}", config.filter, e))?;

  match &config.directory {
    Some(dir) => {
      let (writer, guard) = file_writer(dir);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;
      Ok(None)
    }
  }
}

/// Non-blocking writer over a daily-rotated file in `dir`.
fn file_writer(dir: &Path) -> (NonBlocking, WorkerGuard) {
  let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
  tracing_appender::non_blocking(appender)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_invalid_filter_rejected() {
    let config = LogConfig {
      filter: "shellcache=loud".to_string(),
      directory: None,
    };
    let err = init(&config).unwrap_err();
    assert!(err.to_string().contains("Invalid log filter"));
  }

  #[test]
  fn test_file_writer_rotates_into_directory() {
    let dir = tempfile::tempdir().unwrap();

    let (mut writer, guard) = file_writer(dir.path());
    writer.write_all(b"partition purged\n").unwrap();
    // Dropping the guard flushes the background worker
    drop(guard);

    let files: Vec<_> = std::fs::read_dir(dir.path())
      .unwrap()
      .map(|entry| entry.unwrap().path())
      .collect();
    assert_eq!(files.len(), 1);

    let name = files[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with(LOG_FILE_PREFIX), "{}", name);
    assert_eq!(
      std::fs::read_to_string(&files[0]).unwrap(),
      "partition purged\n"
    );
  }
}
