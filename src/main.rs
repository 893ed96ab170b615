mod app;
mod cache;
mod commands;
mod config;
mod journal;
mod logging;
mod render;
mod storage;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "moonmood")]
#[command(about = "A local-first mood journal that works offline")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/moonmood/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Also print logs to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let data_dir = config.data_dir()?;

  logging::init(&data_dir, config.log.level.as_deref(), args.verbose)?;

  let storage = Arc::new(storage::SqliteStorage::open(&data_dir)?);
  let mut app = app::App::new(config, data_dir, storage);

  let output = app.execute(args.command).await?;
  println!("{}", output);

  Ok(())
}
