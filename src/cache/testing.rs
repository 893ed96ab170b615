//! Test doubles for the network and the clock.

use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Mutex;

use super::traits::{Clock, Fetcher, Request, Response};

/// Scripted network. Unknown URLs answer 404.
#[derive(Default)]
pub struct FakeFetcher {
  responses: Mutex<HashMap<String, Response>>,
  calls: Mutex<HashMap<String, usize>>,
  offline: Mutex<bool>,
  delay: Mutex<Option<std::time::Duration>>,
}

impl FakeFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &str, status: u16, body: &str) {
    self
      .responses
      .lock()
      .unwrap()
      .insert(url.to_string(), Response::new(status, body));
  }

  pub fn set_offline(&self, offline: bool) {
    *self.offline.lock().unwrap() = offline;
  }

  pub fn set_delay(&self, delay: std::time::Duration) {
    *self.delay.lock().unwrap() = Some(delay);
  }

  pub fn calls(&self, url: &str) -> usize {
    self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
  }
}

impl Fetcher for FakeFetcher {
  fn fetch(&self, request: &Request) -> BoxFuture<'static, Result<Response>> {
    let url = request.url.to_string();
    *self.calls.lock().unwrap().entry(url.clone()).or_default() += 1;

    let offline = *self.offline.lock().unwrap();
    let delay = *self.delay.lock().unwrap();
    let response = self
      .responses
      .lock()
      .unwrap()
      .get(&url)
      .cloned()
      .unwrap_or_else(|| Response::new(404, "not found"));

    Box::pin(async move {
      if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
      }
      if offline {
        return Err(eyre!("Failed to fetch {}: network unreachable", url));
      }
      Ok(response)
    })
  }
}

/// Clock that only moves when told to.
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
  pub fn new(now: DateTime<Utc>) -> Self {
    Self {
      now: Mutex::new(now),
    }
  }

  pub fn advance(&self, by: Duration) {
    let mut now = self.now.lock().unwrap();
    *now += by;
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap()
  }
}
