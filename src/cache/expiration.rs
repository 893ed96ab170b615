//! Per-partition size and age limits.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use tracing::debug;

use super::storage::CacheStorage;

/// Limits applied to one cache partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpirationPolicy {
  /// Keep at most this many entries, evicting the oldest first
  pub max_entries: Option<usize>,
  /// Entries cached longer ago than this are expired
  pub max_age: Option<Duration>,
}

impl ExpirationPolicy {
  pub fn max_entries(n: usize) -> Self {
    Self {
      max_entries: Some(n),
      max_age: None,
    }
  }

  pub fn with_max_age(mut self, age: Duration) -> Self {
    self.max_age = Some(age);
    self
  }

  pub fn is_unbounded(&self) -> bool {
    self.max_entries.is_none() && self.max_age.is_none()
  }

  /// Whether an entry cached at `cached_at` may still be served at `now`.
  pub fn is_fresh(&self, cached_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    match self.max_age {
      Some(max_age) => now - cached_at <= max_age,
      None => true,
    }
  }

  /// Purge expired entries, then trim to `max_entries`.
  ///
  /// Returns the number of entries removed.
  pub fn enforce<S: CacheStorage>(&self, storage: &S, partition: &str, now: DateTime<Utc>) -> Result<usize> {
    if self.is_unbounded() {
      return Ok(0);
    }

    let entries = storage.entries(partition)?;
    let (expired, live): (Vec<_>, Vec<_>) = entries
      .into_iter()
      .partition(|meta| !self.is_fresh(meta.cached_at, now));

    let overflow = match self.max_entries {
      Some(max) if live.len() > max => live.len() - max,
      _ => 0,
    };

    let mut removed = 0;
    for meta in expired.iter().chain(live.iter().take(overflow)) {
      storage.delete(partition, &meta.url)?;
      removed += 1;
    }

    if removed > 0 {
      debug!(partition, removed, "expired cache entries");
    }

    Ok(removed)
  }
}
