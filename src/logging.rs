use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Log to a daily rolling file under `<data_dir>/logs`, and to stderr when
/// `verbose` is set. RUST_LOG overrides `level`.
pub fn init(data_dir: &Path, level: Option<&str>, verbose: bool) -> Result<()> {
  let appender = tracing_appender::rolling::Builder::new()
    .rotation(Rotation::DAILY)
    .max_log_files(5)
    .filename_prefix("moonmood")
    .filename_suffix("log")
    .build(data_dir.join("logs"))
    .map_err(|e| eyre!("Failed to create log directory: {}", e))?;

  let stderr = std::io::stderr.with_filter(move |_| verbose);

  let filter = match std::env::var("RUST_LOG") {
    Ok(directive) => EnvFilter::new(directive),
    Err(_) => match level {
      Some(directive) if directive.contains('=') => EnvFilter::new(directive),
      Some(level) => EnvFilter::new(format!("moonmood={}", level)),
      None => EnvFilter::new("moonmood=info"),
    },
  };

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(stderr.and(appender))
    .with_ansi(false)
    .try_init()
    .map_err(|e| eyre!("Failed to initialise logging: {}", e))?;

  Ok(())
}
