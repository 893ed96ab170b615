//! Maps requests to a caching strategy and partition.

use chrono::Duration;
use reqwest::Method;
use tracing::warn;
use url::Url;

use super::expiration::ExpirationPolicy;
use super::storage::url_key;
use super::traits::{Destination, Request};
use crate::config::CacheConfig;

/// Preference order between network and cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  NetworkFirst,
  StaleWhileRevalidate,
  CacheFirst,
}

/// Which requests a route handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMatch {
  /// Full page loads
  Navigation,
  /// Any of the listed destinations
  Destinations(Vec<Destination>),
  /// Exactly these URLs, fragments ignored
  Urls(Vec<Url>),
}

impl RouteMatch {
  fn matches(&self, request: &Request) -> bool {
    match self {
      RouteMatch::Navigation => request.is_navigation(),
      RouteMatch::Destinations(list) => list.contains(&request.destination),
      RouteMatch::Urls(urls) => {
        let key = url_key(&request.url);
        urls.iter().any(|u| url_key(u) == key)
      }
    }
  }
}

#[derive(Debug, Clone)]
pub struct Route {
  pub matcher: RouteMatch,
  pub strategy: Strategy,
  pub partition: String,
  pub expiration: ExpirationPolicy,
}

/// Ordered route table; the first match wins.
#[derive(Debug, Clone)]
pub struct Router {
  routes: Vec<Route>,
}

impl Router {
  /// The app routes: precached shell (when configured), pages, static
  /// assets and images.
  pub fn new(config: &CacheConfig) -> Self {
    let precache = config.precache_urls().unwrap_or_else(|e| {
      warn!(error = %e, "ignoring unusable precache list");
      Vec::new()
    });

    let mut routes = Vec::new();
    if !precache.is_empty() {
      routes.push(Route {
        matcher: RouteMatch::Urls(precache),
        strategy: Strategy::CacheFirst,
        partition: config.partition_name("precache"),
        expiration: ExpirationPolicy::default(),
      });
    }
    routes.extend([
      Route {
        matcher: RouteMatch::Navigation,
        strategy: Strategy::NetworkFirst,
        partition: config.partition_name("pages"),
        expiration: ExpirationPolicy::max_entries(config.pages_max_entries),
      },
      Route {
        matcher: RouteMatch::Destinations(vec![
          Destination::Style,
          Destination::Script,
          Destination::Worker,
        ]),
        strategy: Strategy::StaleWhileRevalidate,
        partition: config.partition_name("static"),
        expiration: ExpirationPolicy::default(),
      },
      Route {
        matcher: RouteMatch::Destinations(vec![Destination::Image]),
        strategy: Strategy::CacheFirst,
        partition: config.partition_name("images"),
        expiration: ExpirationPolicy::max_entries(config.images_max_entries)
          .with_max_age(Duration::days(config.images_max_age_days)),
      },
    ]);

    Self { routes }
  }

  /// Route for `request`. Only GET requests are ever routed.
  pub fn route(&self, request: &Request) -> Option<&Route> {
    if request.method != Method::GET {
      return None;
    }
    self.routes.iter().find(|r| r.matcher.matches(request))
  }

  /// The precache route and its URLs, if a precache list is configured.
  pub fn precache(&self) -> Option<(&Route, &[Url])> {
    self.routes.iter().find_map(|route| match &route.matcher {
      RouteMatch::Urls(urls) => Some((route, urls.as_slice())),
      _ => None,
    })
  }

  /// Partition names owned by this route table.
  pub fn partitions(&self) -> impl Iterator<Item = &str> {
    self.routes.iter().map(|r| r.partition.as_str())
  }
}
