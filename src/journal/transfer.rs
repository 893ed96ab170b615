//! JSON export and import of the journal.

use chrono::NaiveDate;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use super::store::EntryStore;
use super::types::Entry;
use crate::storage::LocalStorage;

/// Reasons an import is rejected. Display strings are shown to the user.
#[derive(Debug, Error)]
pub enum ImportError {
  #[error("Invalid JSON file.")]
  Malformed(#[source] serde_json::Error),

  #[error("Invalid format.")]
  NotASequence,

  #[error("Invalid entry at position {index}: {source}")]
  InvalidEntry {
    index: usize,
    #[source]
    source: serde_json::Error,
  },
}

/// File name used for an export made on `date`.
pub fn export_file_name(date: NaiveDate) -> String {
  format!("mood-entries-{}.json", date.format("%Y-%m-%d"))
}

/// Pretty-printed JSON document of `entries`.
pub fn export_json(entries: &[Entry]) -> Result<String> {
  serde_json::to_string_pretty(entries).map_err(|e| eyre!("Failed to serialize entries: {}", e))
}

/// Write an export into `dir`, returning the path written.
pub fn export_to_dir(entries: &[Entry], dir: &Path, date: NaiveDate) -> Result<PathBuf> {
  let path = dir.join(export_file_name(date));
  let document = export_json(entries)?;

  std::fs::write(&path, document)
    .map_err(|e| eyre!("Failed to write export {}: {}", path.display(), e))?;

  info!(path = %path.display(), count = entries.len(), "exported journal");
  Ok(path)
}

/// Parse an import document into a list of entries.
pub fn parse_import(document: &str) -> Result<Vec<Entry>, ImportError> {
  let value: Value = serde_json::from_str(document).map_err(ImportError::Malformed)?;

  let Value::Array(items) = value else {
    return Err(ImportError::NotASequence);
  };

  items
    .into_iter()
    .enumerate()
    .map(|(index, item)| {
      serde_json::from_value(item).map_err(|source| ImportError::InvalidEntry { index, source })
    })
    .collect()
}

/// Validate `document` and replace the journal with its entries.
///
/// On any validation failure the store is left untouched.
pub fn import<S: LocalStorage>(store: &mut EntryStore<S>, document: &str) -> Result<usize> {
  let entries = parse_import(document)?;
  let count = entries.len();
  store.bulk_replace(entries)?;

  info!(count, "imported journal");
  Ok(count)
}
