//! Cache layer that runs the caching strategies against storage and network.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use url::Url;

use super::router::{Route, Strategy};
use super::storage::{CacheStorage, CachedResponse};
use super::traits::{CacheResult, Clock, Fetcher, Request, Response};

/// Cache layer that manages caching logic and network fetching.
///
/// This layer sits between the controller and the network, applying the
/// strategy of whichever route a request matched.
pub struct CacheLayer<S: CacheStorage, F: Fetcher> {
  storage: Arc<S>,
  fetcher: Arc<F>,
  clock: Arc<dyn Clock>,
  /// Page loads fall back to the cache after this long
  network_timeout: Option<Duration>,
  /// Background revalidations still in flight
  refreshes: TaskTracker,
}

impl<S: CacheStorage, F: Fetcher> CacheLayer<S, F> {
  pub fn new(storage: Arc<S>, fetcher: Arc<F>, clock: Arc<dyn Clock>) -> Self {
    Self {
      storage,
      fetcher,
      clock,
      network_timeout: None,
      refreshes: TaskTracker::new(),
    }
  }

  pub fn with_network_timeout(mut self, timeout: Option<Duration>) -> Self {
    self.network_timeout = timeout;
    self
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Handle `request` with the strategy of `route`, or hit the network
  /// directly when no route matched.
  pub async fn handle(&self, route: Option<&Route>, request: &Request) -> Result<CacheResult<Response>> {
    let Some(route) = route else {
      let response = self.fetcher.fetch(request).await?;
      return Ok(CacheResult::passthrough(response));
    };

    match route.strategy {
      Strategy::NetworkFirst => self.network_first(route, request).await,
      Strategy::StaleWhileRevalidate => self.stale_while_revalidate(route, request).await,
      Strategy::CacheFirst => self.cache_first(route, request).await,
    }
  }

  /// Network-first.
  ///
  /// 1. Try the network; on success cache and return the live response
  /// 2. On failure (or timeout) return the cached copy
  /// 3. With nothing cached, propagate the network error
  pub async fn network_first(&self, route: &Route, request: &Request) -> Result<CacheResult<Response>> {
    match self.fetch_with_timeout(request).await {
      Ok(response) => {
        self.store(route, &request.url, &response);
        Ok(CacheResult::from_network(response))
      }
      Err(err) => match self.lookup(&route.partition, &request.url) {
        Some(cached) => {
          debug!(url = %request.url, error = %err, "network failed, serving cached page");
          Ok(CacheResult::offline(cached.response, cached.cached_at))
        }
        None => Err(err),
      },
    }
  }

  /// Stale-while-revalidate.
  ///
  /// Serve the cached copy immediately and refresh it in the background. With
  /// nothing cached, wait for the network and cache its result.
  pub async fn stale_while_revalidate(
    &self,
    route: &Route,
    request: &Request,
  ) -> Result<CacheResult<Response>> {
    if let Some(cached) = self.lookup(&route.partition, &request.url) {
      let layer = self.clone();
      let route = route.clone();
      let request = request.clone();
      self.refreshes.spawn(async move {
        match layer.fetcher.fetch(&request).await {
          Ok(response) => layer.store(&route, &request.url, &response),
          Err(err) => debug!(url = %request.url, error = %err, "background revalidation failed"),
        }
      });
      return Ok(CacheResult::from_cache(cached.response, cached.cached_at));
    }

    let response = self.fetcher.fetch(request).await?;
    self.store(route, &request.url, &response);
    Ok(CacheResult::from_network(response))
  }

  /// Cache-first with expiration.
  ///
  /// Serve the cached copy while it is within the route's max age; otherwise
  /// fetch, cache and return the live response.
  pub async fn cache_first(&self, route: &Route, request: &Request) -> Result<CacheResult<Response>> {
    if let Some(cached) = self.lookup(&route.partition, &request.url) {
      if route.expiration.is_fresh(cached.cached_at, self.clock.now()) {
        return Ok(CacheResult::from_cache(cached.response, cached.cached_at));
      }
      debug!(url = %request.url, cached_at = %cached.cached_at, "cached response expired");
    }

    let response = self.fetcher.fetch(request).await?;
    self.store(route, &request.url, &response);
    Ok(CacheResult::from_network(response))
  }

  /// Wait for every background revalidation started so far.
  pub async fn settle(&self) {
    self.refreshes.close();
    self.refreshes.wait().await;
    self.refreshes.reopen();
  }

  /// Fill the precache partition with any of `urls` it does not hold yet.
  ///
  /// Every URL must answer 200; otherwise nothing more is fetched and the
  /// error is returned. Returns how many URLs were fetched.
  pub async fn precache(&self, route: &Route, urls: &[Url]) -> Result<usize> {
    let mut fetched = 0;
    for url in urls {
      if self.storage.lookup(&route.partition, url)?.is_some() {
        continue;
      }

      let response = self.fetcher.fetch(&Request::get(url.clone())).await?;
      if !response.is_cacheable() {
        return Err(eyre!("Failed to precache {}: status {}", url, response.status));
      }
      self
        .storage
        .put(&route.partition, url, &response, self.clock.now())?;
      fetched += 1;
    }

    if fetched > 0 {
      info!(partition = %route.partition, fetched, "precached app shell");
    }
    Ok(fetched)
  }

  /// Drop precached URLs that are no longer listed.
  pub fn prune_precache(&self, route: &Route, urls: &[Url]) -> Result<usize> {
    let listed: Vec<&str> = urls.iter().map(Url::as_str).collect();
    let mut removed = 0;
    for meta in self.storage.entries(&route.partition)? {
      if !listed.contains(&meta.url.as_str()) {
        self.storage.delete(&route.partition, &meta.url)?;
        removed += 1;
      }
    }
    Ok(removed)
  }

  async fn fetch_with_timeout(&self, request: &Request) -> Result<Response> {
    let fut = self.fetcher.fetch(request);
    match self.network_timeout {
      Some(timeout) => tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| eyre!("Network timed out after {:?} for {}", timeout, request.url))?,
      None => fut.await,
    }
  }

  /// Cache read; storage failures are treated as a miss.
  fn lookup(&self, partition: &str, url: &Url) -> Option<CachedResponse> {
    match self.storage.lookup(partition, url) {
      Ok(found) => found,
      Err(err) => {
        warn!(partition, url = %url, error = %err, "cache lookup failed");
        None
      }
    }
  }

  /// Cache write plus expiration; failures are logged, never returned.
  fn store(&self, route: &Route, url: &Url, response: &Response) {
    if !response.is_cacheable() {
      debug!(url = %url, status = response.status, "response not cacheable");
      return;
    }

    let now = self.clock.now();
    let result = self
      .storage
      .put(&route.partition, url, response, now)
      .and_then(|()| route.expiration.enforce(self.storage.as_ref(), &route.partition, now));

    if let Err(err) = result {
      warn!(partition = %route.partition, url = %url, error = %err, "cache write failed");
    }
  }
}

impl<S: CacheStorage, F: Fetcher> Clone for CacheLayer<S, F> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      fetcher: Arc::clone(&self.fetcher),
      clock: Arc::clone(&self.clock),
      network_timeout: self.network_timeout,
      refreshes: self.refreshes.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::router::Router;
  use crate::cache::storage::SqliteCacheStorage;
  use crate::cache::testing::{FakeFetcher, ManualClock};
  use crate::cache::traits::{CacheSource, Destination};
  use crate::config::CacheConfig;
  use chrono::Duration as ChronoDuration;

  struct Fixture {
    layer: CacheLayer<SqliteCacheStorage, FakeFetcher>,
    fetcher: Arc<FakeFetcher>,
    clock: Arc<ManualClock>,
    router: Router,
  }

  fn fixture() -> Fixture {
    let storage = Arc::new(SqliteCacheStorage::open_in_memory().unwrap());
    let fetcher = Arc::new(FakeFetcher::new());
    let clock = Arc::new(ManualClock::new("2024-05-01T10:00:00Z".parse().unwrap()));
    let layer = CacheLayer::new(storage, fetcher.clone(), clock.clone());

    Fixture {
      layer,
      fetcher,
      clock,
      router: Router::new(&CacheConfig::default()),
    }
  }

  impl Fixture {
    async fn send(&self, request: &Request) -> Result<CacheResult<Response>> {
      self.layer.handle(self.router.route(request), request).await
    }
  }

  fn page(path: &str) -> Request {
    Request::navigate(Url::parse(&format!("https://mood.test/{}", path)).unwrap())
  }

  fn asset(path: &str, dest: Destination) -> Request {
    Request::get(Url::parse(&format!("https://mood.test/{}", path)).unwrap()).with_destination(dest)
  }

  #[tokio::test]
  async fn test_network_first_caches_live_response() {
    let fx = fixture();
    fx.fetcher.respond("https://mood.test/", 200, "home v1");

    let result = fx.send(&page("")).await.unwrap();
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data.body, b"home v1");

    // Online again with new content: network wins over cache.
    fx.fetcher.respond("https://mood.test/", 200, "home v2");
    let result = fx.send(&page("")).await.unwrap();
    assert_eq!(result.data.body, b"home v2");
  }

  #[tokio::test]
  async fn test_network_first_offline_serves_cached_page() {
    let fx = fixture();
    fx.fetcher.respond("https://mood.test/", 200, "home");
    fx.send(&page("")).await.unwrap();

    fx.fetcher.set_offline(true);
    let result = fx.send(&page("")).await.unwrap();
    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data.body, b"home");
  }

  #[tokio::test]
  async fn test_network_first_offline_without_cache_errors() {
    let fx = fixture();
    fx.fetcher.set_offline(true);
    assert!(fx.send(&page("journal")).await.is_err());
  }

  #[tokio::test]
  async fn test_network_first_timeout_falls_back() {
    let mut fx = fixture();
    fx.fetcher.respond("https://mood.test/", 200, "home");
    fx.send(&page("")).await.unwrap();

    fx.layer = fx.layer.clone().with_network_timeout(Some(Duration::from_millis(20)));
    fx.fetcher.set_delay(Duration::from_millis(200));

    let result = fx.send(&page("")).await.unwrap();
    assert_eq!(result.source, CacheSource::Offline);
  }

  #[tokio::test]
  async fn test_error_status_is_returned_but_not_cached() {
    let fx = fixture();
    fx.fetcher.respond("https://mood.test/missing", 404, "nope");

    let result = fx.send(&page("missing")).await.unwrap();
    assert_eq!(result.data.status, 404);

    fx.fetcher.set_offline(true);
    assert!(fx.send(&page("missing")).await.is_err());
  }

  #[tokio::test]
  async fn test_pages_keep_fifty_newest() {
    let fx = fixture();
    for i in 0..51 {
      let url = format!("https://mood.test/p{}", i);
      fx.fetcher.respond(&url, 200, "page");
      fx.send(&page(&format!("p{}", i))).await.unwrap();
      fx.clock.advance(ChronoDuration::seconds(1));
    }

    let entries = fx.layer.storage().entries("moonmood-offline-v1-pages").unwrap();
    assert_eq!(entries.len(), 50);
    assert_eq!(entries[0].url, "https://mood.test/p1");

    fx.fetcher.set_offline(true);
    assert!(fx.send(&page("p0")).await.is_err());
    assert!(fx.send(&page("p50")).await.is_ok());
  }

  #[tokio::test]
  async fn test_stale_while_revalidate() {
    let fx = fixture();
    let req = asset("app.js", Destination::Script);
    fx.fetcher.respond("https://mood.test/app.js", 200, "v1");

    // Nothing cached: waits for the network.
    let first = fx.send(&req).await.unwrap();
    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(first.data.body, b"v1");

    // Cached copy served immediately while the refresh runs.
    fx.fetcher.respond("https://mood.test/app.js", 200, "v2");
    let second = fx.send(&req).await.unwrap();
    assert_eq!(second.source, CacheSource::Cache);
    assert_eq!(second.data.body, b"v1");

    fx.layer.settle().await;

    let third = fx.send(&req).await.unwrap();
    assert_eq!(third.source, CacheSource::Cache);
    assert_eq!(third.data.body, b"v2");
  }

  #[tokio::test]
  async fn test_stale_while_revalidate_survives_offline_refresh() {
    let fx = fixture();
    let req = asset("app.css", Destination::Style);
    fx.fetcher.respond("https://mood.test/app.css", 200, "body{}");
    fx.send(&req).await.unwrap();

    fx.fetcher.set_offline(true);
    let result = fx.send(&req).await.unwrap();
    assert_eq!(result.data.body, b"body{}");
  }

  #[tokio::test]
  async fn test_cache_first_serves_fresh_copy() {
    let fx = fixture();
    let req = asset("logo.png", Destination::Image);
    fx.fetcher.respond("https://mood.test/logo.png", 200, "png1");
    fx.send(&req).await.unwrap();

    fx.fetcher.respond("https://mood.test/logo.png", 200, "png2");
    fx.clock.advance(ChronoDuration::days(29));

    let result = fx.send(&req).await.unwrap();
    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.data.body, b"png1");
    assert_eq!(fx.fetcher.calls("https://mood.test/logo.png"), 1);
  }

  #[tokio::test]
  async fn test_cache_first_refetches_after_thirty_days() {
    let fx = fixture();
    let req = asset("logo.png", Destination::Image);
    fx.fetcher.respond("https://mood.test/logo.png", 200, "png1");
    fx.send(&req).await.unwrap();

    fx.fetcher.respond("https://mood.test/logo.png", 200, "png2");
    fx.clock.advance(ChronoDuration::days(31));

    let result = fx.send(&req).await.unwrap();
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data.body, b"png2");
    assert_eq!(fx.fetcher.calls("https://mood.test/logo.png"), 2);
  }

  #[tokio::test]
  async fn test_images_keep_sixty_entries() {
    let fx = fixture();
    for i in 0..61 {
      let url = format!("https://mood.test/img{}.png", i);
      fx.fetcher.respond(&url, 200, "img");
      fx.send(&asset(&format!("img{}.png", i), Destination::Image))
        .await
        .unwrap();
    }

    let entries = fx.layer.storage().entries("moonmood-offline-v1-images").unwrap();
    assert_eq!(entries.len(), 60);
    assert_eq!(entries[0].url, "https://mood.test/img1.png");
  }

  #[tokio::test]
  async fn test_settle_waits_for_slow_refresh() {
    let fx = fixture();
    let req = asset("app.js", Destination::Script);
    fx.fetcher.respond("https://mood.test/app.js", 200, "v1");
    fx.send(&req).await.unwrap();

    fx.fetcher.respond("https://mood.test/app.js", 200, "v2");
    fx.fetcher.set_delay(Duration::from_millis(50));
    fx.send(&req).await.unwrap();
    fx.layer.settle().await;

    let cached = fx
      .layer
      .storage()
      .lookup("moonmood-offline-v1-static", &req.url)
      .unwrap()
      .unwrap();
    assert_eq!(cached.response.body, b"v2");
  }

  #[tokio::test]
  async fn test_precache_fetches_missing_urls_once() {
    let config = CacheConfig {
      precache: vec!["https://mood.test/".into(), "https://mood.test/app.js".into()],
      ..CacheConfig::default()
    };
    let mut fx = fixture();
    fx.router = Router::new(&config);
    fx.fetcher.respond("https://mood.test/", 200, "shell");
    fx.fetcher.respond("https://mood.test/app.js", 200, "js");

    let (route, urls) = fx.router.precache().unwrap();
    assert_eq!(fx.layer.precache(route, urls).await.unwrap(), 2);
    assert_eq!(fx.layer.precache(route, urls).await.unwrap(), 0);
    assert_eq!(fx.fetcher.calls("https://mood.test/"), 1);

    // Served from the precache even while offline.
    fx.fetcher.set_offline(true);
    let result = fx.send(&page("")).await.unwrap();
    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.data.body, b"shell");
  }

  #[tokio::test]
  async fn test_precache_rejects_error_status() {
    let config = CacheConfig {
      precache: vec!["https://mood.test/missing.html".into()],
      ..CacheConfig::default()
    };
    let fx = fixture();
    let router = Router::new(&config);
    let (route, urls) = router.precache().unwrap();

    assert!(fx.layer.precache(route, urls).await.is_err());
    assert!(fx.layer.storage().partitions().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_prune_precache_drops_unlisted_urls() {
    let fx = fixture();
    let config = CacheConfig {
      precache: vec!["https://mood.test/a.js".into(), "https://mood.test/b.js".into()],
      ..CacheConfig::default()
    };
    fx.fetcher.respond("https://mood.test/a.js", 200, "a");
    fx.fetcher.respond("https://mood.test/b.js", 200, "b");
    let router = Router::new(&config);
    let (route, urls) = router.precache().unwrap();
    fx.layer.precache(route, urls).await.unwrap();

    assert_eq!(fx.layer.prune_precache(route, &urls[..1]).unwrap(), 1);
    let left = fx.layer.storage().entries(&route.partition).unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].url, "https://mood.test/a.js");
  }

  #[tokio::test]
  async fn test_unmatched_request_passes_through_uncached() {
    let fx = fixture();
    let req = asset("api/data.json", Destination::Empty);
    fx.fetcher.respond("https://mood.test/api/data.json", 200, "{}");

    let result = fx.send(&req).await.unwrap();
    assert_eq!(result.source, CacheSource::Passthrough);
    assert!(fx.layer.storage().partitions().unwrap().is_empty());

    fx.fetcher.set_offline(true);
    assert!(fx.send(&req).await.is_err());
  }
}
