//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;
use url::Url;

use super::traits::Response;

/// A response stored in a partition.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// When the response was (last) written
  pub cached_at: DateTime<Utc>,
}

/// Bookkeeping row used by expiration.
#[derive(Debug, Clone)]
pub struct CachedMeta {
  pub url: String,
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Partitions are created implicitly by the first `put`.
pub trait CacheStorage: Send + Sync + 'static {
  /// Store `response` for `url`, replacing any previous copy.
  fn put(&self, partition: &str, url: &Url, response: &Response, cached_at: DateTime<Utc>)
    -> Result<()>;

  /// Look up the cached response for `url`.
  fn lookup(&self, partition: &str, url: &Url) -> Result<Option<CachedResponse>>;

  /// Drop the cached response for `url`, if any.
  fn delete(&self, partition: &str, url: &str) -> Result<()>;

  /// All entries of a partition, oldest first.
  fn entries(&self, partition: &str) -> Result<Vec<CachedMeta>>;

  /// Names of every partition holding at least one entry.
  fn partitions(&self) -> Result<Vec<String>>;

  /// Remove a whole partition.
  fn delete_partition(&self, partition: &str) -> Result<()>;

  /// Version of the controller that was last activated for `family`.
  fn active_version(&self, family: &str) -> Result<Option<u32>>;

  /// Record `version` as the active controller of `family`.
  fn set_active_version(&self, family: &str, version: u32) -> Result<()>;
}

/// Cache key for a URL. Fragments never reach the network, so they are ignored.
pub fn url_key(url: &Url) -> String {
  let mut url = url.clone();
  url.set_fragment(None);

  let mut hasher = Sha256::new();
  hasher.update(url.as_str().as_bytes());
  hex::encode(hasher.finalize())
}

fn url_key_str(url: &str) -> String {
  match Url::parse(url) {
    Ok(parsed) => url_key(&parsed),
    Err(_) => {
      let mut hasher = Sha256::new();
      hasher.update(url.as_bytes());
      hex::encode(hasher.finalize())
    }
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteCacheStorage {
  conn: Mutex<Connection>,
}

impl SqliteCacheStorage {
  /// Open or create the cache database inside `data_dir`.
  pub fn open(data_dir: &Path) -> Result<Self> {
    let path = data_dir.join("cache.db");

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory cache: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    partition TEXT NOT NULL,
    url_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    -- write order, breaks ties between equal timestamps
    seq INTEGER NOT NULL,
    PRIMARY KEY (partition, url_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_age
    ON cache_entries(partition, cached_at, seq);

CREATE TABLE IF NOT EXISTS registrations (
    family TEXT PRIMARY KEY,
    active_version INTEGER NOT NULL,
    activated_at TEXT NOT NULL
);
"#;

impl CacheStorage for SqliteCacheStorage {
  fn put(
    &self,
    partition: &str,
    url: &Url,
    response: &Response,
    cached_at: DateTime<Utc>,
  ) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries
           (partition, url_key, url, status, headers, body, cached_at, seq)
         VALUES (?, ?, ?, ?, ?, ?, ?,
           (SELECT COALESCE(MAX(seq), 0) + 1 FROM cache_entries))",
        params![
          partition,
          url_key(url),
          url.as_str(),
          response.status,
          headers,
          response.body,
          format_datetime(cached_at),
        ],
      )
      .map_err(|e| eyre!("Failed to store {} in {}: {}", url, partition, e))?;

    Ok(())
  }

  fn lookup(&self, partition: &str, url: &Url) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM cache_entries
         WHERE partition = ? AND url_key = ?",
        params![partition, url_key(url)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in {}: {}", url, partition, e))?;

    match row {
      Some((status, headers, body, cached_at)) => {
        let headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        Ok(Some(CachedResponse {
          response: Response {
            status,
            headers,
            body,
          },
          cached_at: parse_datetime(&cached_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn delete(&self, partition: &str, url: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM cache_entries WHERE partition = ? AND url_key = ?",
        params![partition, url_key_str(url)],
      )
      .map_err(|e| eyre!("Failed to delete {} from {}: {}", url, partition, e))?;

    Ok(())
  }

  fn entries(&self, partition: &str) -> Result<Vec<CachedMeta>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT url, cached_at FROM cache_entries
         WHERE partition = ?
         ORDER BY cached_at, seq",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, String)> = stmt
      .query_map(params![partition], |row| Ok((row.get(0)?, row.get(1)?)))
      .map_err(|e| eyre!("Failed to list {}: {}", partition, e))?
      .filter_map(|r| r.ok())
      .collect();

    rows
      .into_iter()
      .map(|(url, cached_at)| {
        Ok(CachedMeta {
          url,
          cached_at: parse_datetime(&cached_at)?,
        })
      })
      .collect()
  }

  fn partitions(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT DISTINCT partition FROM cache_entries ORDER BY partition")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  fn delete_partition(&self, partition: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM cache_entries WHERE partition = ?",
        params![partition],
      )
      .map_err(|e| eyre!("Failed to delete partition {}: {}", partition, e))?;

    Ok(())
  }

  fn active_version(&self, family: &str) -> Result<Option<u32>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .query_row(
        "SELECT active_version FROM registrations WHERE family = ?",
        params![family],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read active version of {}: {}", family, e))
  }

  fn set_active_version(&self, family: &str, version: u32) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO registrations (family, active_version, activated_at)
         VALUES (?, ?, ?)",
        params![family, version, format_datetime(Utc::now())],
      )
      .map_err(|e| eyre!("Failed to record active version of {}: {}", family, e))?;

    Ok(())
  }
}

// Fixed-width UTC so that text ordering matches time ordering.
fn format_datetime(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
