//! Command line surface.

use chrono::NaiveDate;
use clap::{Args, Subcommand};
use serde_json::{Map, Value};
use std::path::PathBuf;

use crate::cache::Destination;
use crate::journal::{Mood, MoodFilter};

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
  /// Log a new entry
  #[command(alias = "a")]
  Add(EntryArgs),

  /// Log today's mood, updating today's entry if there is one
  #[command(alias = "t")]
  Today(EntryArgs),

  /// Change an existing entry
  #[command(alias = "e")]
  Edit {
    id: String,
    #[command(flatten)]
    fields: EntryArgs,
  },

  /// Delete an entry
  #[command(aliases = ["rm", "del"])]
  Delete { id: String },

  /// Browse and search the journal
  #[command(aliases = ["ls", "journal"])]
  List {
    /// Text to look for in notes and tags
    #[arg(short, long, default_value = "")]
    query: String,
    /// Mood to show, or "all"
    #[arg(short, long, default_value = "all")]
    mood: MoodFilter,
  },

  /// Last 7 days, streak and mood totals
  #[command(alias = "i")]
  Insights,

  /// Show or change preferences
  Settings {
    /// KEY=VALUE; VALUE is read as JSON when possible, else as a string
    #[arg(long = "set", value_parser = parse_setting)]
    set: Vec<(String, Value)>,
  },

  /// Write all entries to mood-entries-<date>.json
  Export {
    #[arg(short, long, default_value = ".")]
    dir: PathBuf,
  },

  /// Replace all entries with the contents of a JSON export
  Import { file: PathBuf },

  /// Request a URL through the offline cache controller
  Fetch {
    /// Absolute URL, or a path resolved against cache.origin
    url: String,
    /// Treat as a page load
    #[arg(long)]
    navigate: bool,
    /// Request destination (style, script, worker, image, ...)
    #[arg(short, long, default_value = "empty")]
    destination: Destination,
    /// Let a newly configured cache version take over right away
    #[arg(long)]
    skip_waiting: bool,
  },
}

#[derive(Args, Debug, Clone, Default)]
pub struct EntryArgs {
  #[arg(short, long)]
  pub mood: Option<Mood>,
  /// Day the entry is for (YYYY-MM-DD)
  #[arg(short, long)]
  pub date: Option<NaiveDate>,
  #[arg(short, long)]
  pub note: Option<String>,
  /// Comma separated, e.g. "sleep, workout"
  #[arg(short, long)]
  pub tags: Option<String>,
}

fn parse_setting(input: &str) -> Result<(String, Value), String> {
  let (key, raw) = input
    .split_once('=')
    .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", input))?;

  let key = key.trim();
  if key.is_empty() {
    return Err("setting key cannot be empty".to_string());
  }

  let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
  Ok((key.to_string(), value))
}

/// Collect `--set` pairs into a partial settings object.
pub fn settings_patch(pairs: Vec<(String, Value)>) -> Map<String, Value> {
  pairs.into_iter().collect()
}
