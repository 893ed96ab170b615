//! Core types for the offline cache controller.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use futures::future::BoxFuture;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use url::Url;

/// How the request was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
  /// Full page load
  Navigate,
  /// Anything issued from script or markup
  #[default]
  Subresource,
}

/// What kind of resource the request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
  Document,
  Style,
  Script,
  Worker,
  Image,
  Font,
  Manifest,
  /// fetch()/XHR without a specific destination
  #[default]
  Empty,
}

impl FromStr for Destination {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "document" => Ok(Destination::Document),
      "style" => Ok(Destination::Style),
      "script" => Ok(Destination::Script),
      "worker" => Ok(Destination::Worker),
      "image" => Ok(Destination::Image),
      "font" => Ok(Destination::Font),
      "manifest" => Ok(Destination::Manifest),
      "" | "empty" => Ok(Destination::Empty),
      other => Err(format!("unknown destination '{}'", other)),
    }
  }
}

/// An outgoing request seen by the controller.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub destination: Destination,
}

impl Request {
  /// A plain GET with no particular destination.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::default(),
      destination: Destination::default(),
    }
  }

  /// A full page load of `url`.
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      destination: Destination::Document,
      ..Self::get(url)
    }
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }
}

/// A response, either live or replayed from a cache partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  /// Only plain 200 responses are stored.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200
  }
}

/// Issues requests to the live network.
pub trait Fetcher: Send + Sync + 'static {
  fn fetch(&self, request: &Request) -> BoxFuture<'static, Result<Response>>;
}

/// Source of the current time, swappable in tests.
pub trait Clock: Send + Sync + 'static {
  fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Result from the controller, including the response and where it came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Network failed; serving what was cached.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  /// No route matched; the network answered directly.
  pub fn passthrough(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Passthrough,
      cached_at: None,
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh from the network, cached per the route's policy
  Network,
  /// Served from a cache partition
  Cache,
  /// Network unavailable, serving the cached fallback
  Offline,
  /// Not handled by any route
  Passthrough,
}

/// Messages the foreground can post to a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
  /// Activate the waiting controller now instead of waiting for clients to close.
  SkipWaiting,
}
