//! Persisted entry and settings stores.
//!
//! Every mutation is written through to the storage backend before the
//! in-memory copy changes. Two processes writing the same storage are not
//! coordinated; the last writer wins.

use chrono::NaiveDate;
use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use super::types::{Entry, Settings};
use crate::storage::LocalStorage;

pub const ENTRIES_KEY: &str = "mood_pwa_entries_v1";
pub const SETTINGS_KEY: &str = "mood_pwa_settings_v1";

/// Read and decode a JSON value, treating anything unreadable as absent.
fn load_json<S: LocalStorage, T: DeserializeOwned>(storage: &S, key: &str) -> Option<T> {
  let raw = match storage.get_item(key) {
    Ok(Some(raw)) => raw,
    Ok(None) => return None,
    Err(e) => {
      warn!(key, error = %e, "failed to read persisted value");
      return None;
    }
  };

  match serde_json::from_str(&raw) {
    Ok(value) => Some(value),
    Err(e) => {
      warn!(key, error = %e, "discarding unparseable persisted value");
      None
    }
  }
}

fn save_json<S: LocalStorage, T: Serialize + ?Sized>(storage: &S, key: &str, value: &T) -> Result<()> {
  let serialized =
    serde_json::to_string(value).map_err(|e| eyre!("Failed to serialize {}: {}", key, e))?;
  storage.set_item(key, &serialized)
}

/// Journal entries, kept sorted by date descending.
pub struct EntryStore<S: LocalStorage> {
  storage: Arc<S>,
  entries: Vec<Entry>,
  /// Stored records that do not decode as entries. Written back after the
  /// entries so a bad record never takes the rest of the journal with it.
  unreadable: Vec<Value>,
}

impl<S: LocalStorage> EntryStore<S> {
  /// Load the collection; missing or corrupt data yields an empty journal.
  /// Records that fail to decode are skipped but kept in storage.
  pub fn load(storage: Arc<S>) -> Self {
    let records: Vec<Value> = load_json(storage.as_ref(), ENTRIES_KEY).unwrap_or_default();

    let mut entries = Vec::with_capacity(records.len());
    let mut unreadable = Vec::new();
    for (index, record) in records.into_iter().enumerate() {
      match serde_json::from_value::<Entry>(record.clone()) {
        Ok(entry) => entries.push(entry),
        Err(e) => {
          warn!(index, error = %e, "skipping unreadable journal entry");
          unreadable.push(record);
        }
      }
    }

    debug!(
      count = entries.len(),
      skipped = unreadable.len(),
      "loaded journal entries"
    );
    Self {
      storage,
      entries,
      unreadable,
    }
  }

  pub fn entries(&self) -> &[Entry] {
    &self.entries
  }

  pub fn get(&self, id: &str) -> Option<&Entry> {
    self.entries.iter().find(|e| e.id == id)
  }

  /// First entry logged for `date`.
  pub fn entry_for(&self, date: NaiveDate) -> Option<&Entry> {
    self.entries.iter().find(|e| e.date == date)
  }

  /// Insert at the head, then stable-sort by date descending.
  pub fn add(&mut self, entry: Entry) -> Result<()> {
    let mut next = Vec::with_capacity(self.entries.len() + 1);
    next.push(entry);
    next.extend(self.entries.iter().cloned());
    next.sort_by(|a, b| b.date.cmp(&a.date));
    self.commit(next)
  }

  /// Replace the entry with the same id. Unknown ids are ignored.
  pub fn update(&mut self, entry: Entry) -> Result<()> {
    if !self.entries.iter().any(|e| e.id == entry.id) {
      debug!(id = %entry.id, "update for unknown entry ignored");
      return Ok(());
    }

    let next = self
      .entries
      .iter()
      .map(|e| if e.id == entry.id { entry.clone() } else { e.clone() })
      .collect();
    self.commit(next)
  }

  /// Remove every entry with this id.
  pub fn delete(&mut self, id: &str) -> Result<()> {
    let next = self.entries.iter().filter(|e| e.id != id).cloned().collect();
    self.commit(next)
  }

  /// Discard the current collection, unreadable records included, and store
  /// `entries` verbatim.
  pub fn bulk_replace(&mut self, entries: Vec<Entry>) -> Result<()> {
    save_json(self.storage.as_ref(), ENTRIES_KEY, &entries)?;
    self.entries = entries;
    self.unreadable.clear();
    Ok(())
  }

  fn commit(&mut self, next: Vec<Entry>) -> Result<()> {
    let mut records = Vec::with_capacity(next.len() + self.unreadable.len());
    for entry in &next {
      records.push(
        serde_json::to_value(entry).map_err(|e| eyre!("Failed to serialize entry {}: {}", entry.id, e))?,
      );
    }
    records.extend(self.unreadable.iter().cloned());

    save_json(self.storage.as_ref(), ENTRIES_KEY, &records)?;
    self.entries = next;
    Ok(())
  }
}

/// User preferences, persisted as a single JSON object.
pub struct SettingsStore<S: LocalStorage> {
  storage: Arc<S>,
  settings: Settings,
}

impl<S: LocalStorage> SettingsStore<S> {
  /// Defaults overlaid with whatever object was persisted.
  pub fn load(storage: Arc<S>) -> Self {
    let mut settings = Settings::default();
    if let Some(Value::Object(saved)) = load_json::<_, Value>(storage.as_ref(), SETTINGS_KEY) {
      settings.merge(saved);
    }
    Self { storage, settings }
  }

  pub fn settings(&self) -> &Settings {
    &self.settings
  }

  /// Shallow-merge `partial` and persist the result.
  pub fn update(&mut self, partial: Map<String, Value>) -> Result<()> {
    let mut next = self.settings.clone();
    next.merge(partial);
    save_json(self.storage.as_ref(), SETTINGS_KEY, &next)?;
    self.settings = next;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::journal::types::Mood;
  use crate::storage::MemoryStorage;
  use chrono::{DateTime, Utc};
  use serde_json::json;

  fn day(s: &str) -> NaiveDate {
    s.parse().unwrap()
  }

  fn now() -> DateTime<Utc> {
    "2024-01-10T12:00:00Z".parse().unwrap()
  }

  fn entry(date: &str, mood: Mood) -> Entry {
    Entry::new(day(date), mood, "", vec![], now())
  }

  /// Storage whose writes always fail.
  struct ReadOnlyStorage;

  impl LocalStorage for ReadOnlyStorage {
    fn get_item(&self, _key: &str) -> Result<Option<String>> {
      Ok(None)
    }

    fn set_item(&self, _key: &str, _value: &str) -> Result<()> {
      Err(eyre!("disk full"))
    }

    fn remove_item(&self, _key: &str) -> Result<()> {
      Ok(())
    }
  }

  #[test]
  fn test_reload_round_trip() {
    let storage = Arc::new(MemoryStorage::new());
    let mut store = EntryStore::load(storage.clone());
    store.add(entry("2024-01-02", Mood::Good)).unwrap();
    store.add(entry("2024-01-05", Mood::Bad)).unwrap();

    let reloaded = EntryStore::load(storage);
    assert_eq!(reloaded.entries(), store.entries());
  }

  #[test]
  fn test_add_sorts_date_descending() {
    let mut store = EntryStore::load(Arc::new(MemoryStorage::new()));
    store.add(entry("2024-01-02", Mood::Good)).unwrap();
    store.add(entry("2024-01-05", Mood::Bad)).unwrap();
    store.add(entry("2024-01-03", Mood::Meh)).unwrap();

    let dates: Vec<String> = store.entries().iter().map(|e| e.date.to_string()).collect();
    assert_eq!(dates, vec!["2024-01-05", "2024-01-03", "2024-01-02"]);
  }

  #[test]
  fn test_add_same_date_puts_newest_first() {
    let mut store = EntryStore::load(Arc::new(MemoryStorage::new()));
    let first = entry("2024-01-02", Mood::Good);
    let second = entry("2024-01-02", Mood::Bad);
    store.add(first.clone()).unwrap();
    store.add(second.clone()).unwrap();

    assert_eq!(store.entries(), &[second, first]);
  }

  #[test]
  fn test_update_replaces_matching_id() {
    let mut store = EntryStore::load(Arc::new(MemoryStorage::new()));
    let original = entry("2024-01-02", Mood::Good);
    store.add(original.clone()).unwrap();

    let revised = original.revised(original.date, Mood::Awful, "storm", vec![], now());
    store.update(revised.clone()).unwrap();

    assert_eq!(store.entries(), &[revised]);
  }

  #[test]
  fn test_update_unknown_id_is_noop() {
    let storage = Arc::new(MemoryStorage::new());
    let mut store = EntryStore::load(storage.clone());
    store.add(entry("2024-01-02", Mood::Good)).unwrap();
    let before = store.entries().to_vec();

    store.update(entry("2024-01-03", Mood::Bad)).unwrap();

    assert_eq!(store.entries(), before.as_slice());
    assert_eq!(EntryStore::load(storage).entries(), before.as_slice());
  }

  #[test]
  fn test_delete_is_idempotent() {
    let mut store = EntryStore::load(Arc::new(MemoryStorage::new()));
    let a = entry("2024-01-02", Mood::Good);
    store.add(a.clone()).unwrap();
    store.add(entry("2024-01-03", Mood::Meh)).unwrap();

    store.delete(&a.id).unwrap();
    let after_first = store.entries().to_vec();
    store.delete(&a.id).unwrap();

    assert_eq!(store.entries(), after_first.as_slice());
    assert_eq!(store.entries().len(), 1);
  }

  #[test]
  fn test_delete_removes_duplicate_ids() {
    let mut store = EntryStore::load(Arc::new(MemoryStorage::new()));
    let a = entry("2024-01-02", Mood::Good);
    let mut dup = entry("2024-01-04", Mood::Bad);
    dup.id = a.id.clone();
    store.bulk_replace(vec![a.clone(), dup]).unwrap();

    store.delete(&a.id).unwrap();
    assert!(store.entries().is_empty());
  }

  #[test]
  fn test_bulk_replace_stores_verbatim() {
    let storage = Arc::new(MemoryStorage::new());
    let mut store = EntryStore::load(storage.clone());
    store.add(entry("2024-01-09", Mood::Good)).unwrap();

    // Deliberately unsorted; stored as given.
    let list = vec![entry("2024-01-01", Mood::Meh), entry("2024-01-03", Mood::Bad)];
    store.bulk_replace(list.clone()).unwrap();

    assert_eq!(store.entries(), list.as_slice());
    assert_eq!(EntryStore::load(storage).entries(), list.as_slice());
  }

  #[test]
  fn test_corrupt_entries_load_empty() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set_item(ENTRIES_KEY, "{not json").unwrap();
    assert!(EntryStore::load(storage.clone()).entries().is_empty());

    storage.set_item(ENTRIES_KEY, r#"{"foo": 1}"#).unwrap();
    assert!(EntryStore::load(storage).entries().is_empty());
  }

  #[test]
  fn test_unreadable_record_does_not_hide_the_rest() {
    let storage = Arc::new(MemoryStorage::new());
    let good = entry("2024-01-02", Mood::Good);
    let bad = json!({ "id": "b", "date": "2024-01-01", "mood": "ok" });
    let stored = json!([serde_json::to_value(&good).unwrap(), bad.clone()]);
    storage.set_item(ENTRIES_KEY, &stored.to_string()).unwrap();

    let mut store = EntryStore::load(storage.clone());
    assert_eq!(store.entries(), &[good.clone()]);

    let added = entry("2024-01-03", Mood::Great);
    store.add(added.clone()).unwrap();

    let persisted: Vec<Value> =
      serde_json::from_str(&storage.get_item(ENTRIES_KEY).unwrap().unwrap()).unwrap();
    assert_eq!(persisted.len(), 3);
    assert_eq!(persisted[2], bad);
    assert_eq!(EntryStore::load(storage).entries(), &[added, good]);
  }

  #[test]
  fn test_bulk_replace_drops_unreadable_records() {
    let storage = Arc::new(MemoryStorage::new());
    storage
      .set_item(ENTRIES_KEY, r#"[{"id": "b", "mood": "ok"}]"#)
      .unwrap();

    let mut store = EntryStore::load(storage.clone());
    assert!(store.entries().is_empty());
    store.bulk_replace(vec![entry("2024-01-01", Mood::Meh)]).unwrap();

    let persisted: Vec<Value> =
      serde_json::from_str(&storage.get_item(ENTRIES_KEY).unwrap().unwrap()).unwrap();
    assert_eq!(persisted.len(), 1);
  }

  #[test]
  fn test_failed_write_leaves_memory_unchanged() {
    let mut store = EntryStore::load(Arc::new(ReadOnlyStorage));
    assert!(store.add(entry("2024-01-02", Mood::Good)).is_err());
    assert!(store.entries().is_empty());
  }

  #[test]
  fn test_entry_for_date() {
    let mut store = EntryStore::load(Arc::new(MemoryStorage::new()));
    let a = entry("2024-01-02", Mood::Good);
    store.add(a.clone()).unwrap();

    assert_eq!(store.entry_for(day("2024-01-02")), Some(&a));
    assert_eq!(store.entry_for(day("2024-01-03")), None);
  }

  #[test]
  fn test_settings_defaults_and_merge() {
    let storage = Arc::new(MemoryStorage::new());
    let mut store = SettingsStore::load(storage.clone());
    assert!(store.settings().enable_hints());

    let partial = json!({ "enableHints": false, "accent": "blue" });
    store.update(partial.as_object().unwrap().clone()).unwrap();

    let reloaded = SettingsStore::load(storage);
    assert!(!reloaded.settings().enable_hints());
    assert!(!reloaded.settings().start_week_on_monday());
    assert_eq!(reloaded.settings().get("accent"), Some(&json!("blue")));
  }

  #[test]
  fn test_settings_corrupt_or_non_object_use_defaults() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set_item(SETTINGS_KEY, "[1, 2]").unwrap();
    assert_eq!(SettingsStore::load(storage.clone()).settings(), &Settings::default());

    storage.set_item(SETTINGS_KEY, "nope").unwrap();
    assert_eq!(SettingsStore::load(storage).settings(), &Settings::default());
  }
}
