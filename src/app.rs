use chrono::{DateTime, Local, NaiveDate, Utc};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use url::Url;

use crate::cache::{
  self, CacheSource, HttpFetcher, InstallState, Request, SqliteCacheStorage, SystemClock, Visit,
};
use crate::commands::{settings_patch, Command, EntryArgs};
use crate::config::Config;
use crate::journal::{parse_tags, transfer, views, Entry, EntryStore, Insights, Mood, SettingsStore};
use crate::render;
use crate::storage::LocalStorage;

/// Main application state
pub struct App<S: LocalStorage> {
  config: Config,
  data_dir: PathBuf,
  entries: EntryStore<S>,
  settings: SettingsStore<S>,
}

impl<S: LocalStorage> App<S> {
  pub fn new(config: Config, data_dir: PathBuf, storage: Arc<S>) -> Self {
    Self {
      config,
      data_dir,
      entries: EntryStore::load(storage.clone()),
      settings: SettingsStore::load(storage),
    }
  }

  /// Run one command and return what should be printed.
  pub async fn execute(&mut self, command: Command) -> Result<String> {
    let today = Local::now().date_naive();
    let now = Utc::now();

    match command {
      Command::Add(args) => self.add(args, today, now),
      Command::Today(args) => self.log_today(args, today, now),
      Command::Edit { id, fields } => self.edit(&id, fields, now),
      Command::Delete { id } => {
        if self.entries.get(&id).is_none() {
          return Ok(format!("No entry with id {}", id));
        }
        self.entries.delete(&id)?;
        Ok(format!("Deleted {}", id))
      }
      Command::List { query, mood } => {
        let found = views::filter(self.entries.entries(), &query, mood);
        Ok(render::entry_list(&found))
      }
      Command::Insights => Ok(render::insights(&Insights::compute(
        self.entries.entries(),
        today,
      ))),
      Command::Settings { set } => {
        if !set.is_empty() {
          self.settings.update(settings_patch(set))?;
        }
        Ok(render::settings(self.settings.settings()))
      }
      Command::Export { dir } => {
        let path = transfer::export_to_dir(self.entries.entries(), &dir, now.date_naive())?;
        Ok(format!("Exported {} entries to {}", self.entries.entries().len(), path.display()))
      }
      Command::Import { file } => {
        let document = std::fs::read_to_string(&file)
          .map_err(|e| eyre!("Failed to read {}: {}", file.display(), e))?;
        let count = transfer::import(&mut self.entries, &document)?;
        Ok(format!("Imported {} entries", count))
      }
      Command::Fetch {
        url,
        navigate,
        destination,
        skip_waiting,
      } => {
        let url = self.resolve_url(&url)?;
        let request = if navigate {
          Request::navigate(url)
        } else {
          Request::get(url).with_destination(destination)
        };
        self.fetch(request, skip_waiting).await
      }
    }
  }

  fn add(&mut self, args: EntryArgs, today: NaiveDate, now: DateTime<Utc>) -> Result<String> {
    let entry = Entry::new(
      args.date.unwrap_or(today),
      args.mood.unwrap_or(Mood::Good),
      args.note.as_deref().unwrap_or(""),
      parse_tags(args.tags.as_deref().unwrap_or("")),
      now,
    );
    let summary = self.saved_message("Saved", &entry);
    self.entries.add(entry)?;
    Ok(summary)
  }

  fn log_today(&mut self, args: EntryArgs, today: NaiveDate, now: DateTime<Utc>) -> Result<String> {
    let date = args.date.unwrap_or(today);
    match self.entries.entry_for(date).cloned() {
      Some(existing) => {
        let revised = revise(&existing, args, now);
        let summary = self.saved_message("Updated", &revised);
        self.entries.update(revised)?;
        Ok(summary)
      }
      None => self.add(EntryArgs { date: Some(date), ..args }, today, now),
    }
  }

  fn edit(&mut self, id: &str, args: EntryArgs, now: DateTime<Utc>) -> Result<String> {
    let Some(existing) = self.entries.get(id).cloned() else {
      return Ok(format!("No entry with id {}", id));
    };
    let revised = revise(&existing, args, now);
    let summary = self.saved_message("Updated", &revised);
    self.entries.update(revised)?;
    Ok(summary)
  }

  fn saved_message(&self, verb: &str, entry: &Entry) -> String {
    let mut msg = format!("{} {}", verb, render::entry(entry));
    if self.settings.settings().enable_hints() {
      msg.push_str("\nData is saved locally and works offline.");
    }
    msg
  }

  fn resolve_url(&self, input: &str) -> Result<Url> {
    self.config.cache.resolve(input)
  }

  async fn fetch(&self, request: Request, skip_waiting: bool) -> Result<String> {
    let storage = Arc::new(SqliteCacheStorage::open(&self.data_dir)?);
    let fetcher = Arc::new(HttpFetcher::new()?);

    let url = request.url.clone();
    let visit = cache::visit(
      &self.config.cache,
      storage,
      fetcher,
      Arc::new(SystemClock),
      request,
      skip_waiting,
    )
    .await?;
    info!(
      url = %url,
      source = ?visit.result.source,
      status = visit.result.data.status,
      "fetched"
    );

    Ok(describe_visit(&url, &visit))
  }

  #[cfg(test)]
  pub fn entries(&self) -> &EntryStore<S> {
    &self.entries
  }
}

fn describe_visit(url: &Url, visit: &Visit) -> String {
  let result = &visit.result;
  let source = match result.source {
    CacheSource::Network => "network",
    CacheSource::Cache => "cache",
    CacheSource::Offline => "cache (offline fallback)",
    CacheSource::Passthrough => "network (not cached)",
  };
  let mut out = format!(
    "{} {} from {}, {} bytes",
    result.data.status,
    url,
    source,
    result.data.body.len()
  );
  if let Some(cached_at) = result.cached_at {
    out.push_str(&format!(", cached {}", cached_at.to_rfc3339()));
  }
  if let Some(version) = visit.served_by {
    out.push_str(&format!("\nServed by cache v{}", version));
  }
  if visit.installed == InstallState::Waiting && visit.active != visit.served_by {
    if let Some(version) = visit.active {
      out.push_str(&format!("; v{} took over when the page closed", version));
    }
  }
  out
}

/// Apply the given fields over `existing`; absent fields keep their value.
fn revise(existing: &Entry, args: EntryArgs, now: DateTime<Utc>) -> Entry {
  let tags = match args.tags {
    Some(raw) => parse_tags(&raw),
    None => existing.tags.clone(),
  };
  existing.revised(
    args.date.unwrap_or(existing.date),
    args.mood.unwrap_or(existing.mood),
    args.note.as_deref().unwrap_or(&existing.note),
    tags,
    now,
  )
}
