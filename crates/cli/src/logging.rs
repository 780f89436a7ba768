//! Logging setup for the CLI.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Initialize logging, to console or to a file.
///
/// Returns the guard that must be kept alive for the duration of the
/// program when logging to a file.
pub fn init_logging(log_file: Option<&Path>) -> Option<WorkerGuard> {
  let env_filter = EnvFilter::builder()
    .with_default_directive(tracing::Level::INFO.into())
    .from_env_lossy();

  match log_file {
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(true)
        .init();
      None
    }
    Some(path) => {
      let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
      let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned());
      let appender = tracing_appender::rolling::never(dir, file_name.unwrap_or_else(|| "vecsync.log".to_string()));
      let (writer, guard) = tracing_appender::non_blocking(appender);

      tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_ansi(false)
        .with_writer(writer)
        .init();
      Some(guard)
    }
  }
}
