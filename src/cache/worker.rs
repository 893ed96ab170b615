//! One version of the cache controller, running as its own task.

use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::layer::CacheLayer;
use super::router::Router;
use super::storage::CacheStorage;
use super::traits::{CacheResult, Clock, ControlMessage, Fetcher, Request, Response};
use crate::config::CacheConfig;

pub type WorkerId = u64;

/// Messages delivered to a running controller.
#[derive(Debug)]
pub(super) enum WorkerMessage {
  /// An intercepted request; the answer goes back on `reply`
  Fetch {
    request: Request,
    reply: oneshot::Sender<Result<CacheResult<Response>>>,
  },
  /// A message posted by the foreground; `handled` fires once the
  /// registration has acted on it
  Control {
    message: ControlMessage,
    handled: oneshot::Sender<()>,
  },
  /// This controller is now the active one
  Activate,
  /// Reply once every background refresh started so far has finished
  Settle { reply: oneshot::Sender<()> },
}

/// Lifecycle requests a controller makes to its registration.
#[derive(Debug)]
pub(super) enum LifecycleEvent {
  SkipWaiting {
    worker: WorkerId,
    handled: oneshot::Sender<()>,
  },
}

/// The cache controller for one policy version.
pub struct Controller<S: CacheStorage, F: Fetcher> {
  config: CacheConfig,
  router: Router,
  layer: CacheLayer<S, F>,
}

impl<S: CacheStorage, F: Fetcher> Controller<S, F> {
  pub fn new(config: &CacheConfig, storage: Arc<S>, fetcher: Arc<F>, clock: Arc<dyn Clock>) -> Self {
    let timeout = config
      .network_timeout_secs
      .map(std::time::Duration::from_secs);
    let layer = CacheLayer::new(storage, fetcher, clock).with_network_timeout(timeout);

    Self {
      config: config.clone(),
      router: Router::new(config),
      layer,
    }
  }

  pub fn version(&self) -> u32 {
    self.config.version
  }

  /// Route `request` and apply the matching strategy.
  pub async fn handle(&self, request: Request) -> Result<CacheResult<Response>> {
    let route = self.router.route(&request);
    debug!(
      url = %request.url,
      strategy = ?route.map(|r| r.strategy),
      "intercepted request"
    );
    self.layer.handle(route, &request).await
  }

  /// Install step: fill the precache partition. An error here means this
  /// version must not be installed.
  pub async fn install(&self) -> Result<usize> {
    match self.router.precache() {
      Some((route, urls)) => self.layer.precache(route, urls).await,
      None => Ok(0),
    }
  }

  /// Activation step: drop other versions' partitions and stale precache
  /// entries, then record this version as the active one.
  pub fn activate(&self) -> Result<()> {
    self.cleanup_outdated()?;
    if let Some((route, urls)) = self.router.precache() {
      let removed = self.layer.prune_precache(route, urls)?;
      if removed > 0 {
        debug!(removed, "pruned unlisted precache entries");
      }
    }
    self
      .layer
      .storage()
      .set_active_version(&self.config.family, self.config.version)
  }

  /// Wait for background refreshes to land.
  pub async fn settle(&self) {
    self.layer.settle().await;
  }

  /// Delete partitions of this cache family that belong to other versions.
  pub fn cleanup_outdated(&self) -> Result<Vec<String>> {
    let storage = self.layer.storage();
    let own: Vec<&str> = self.router.partitions().collect();

    let mut removed = Vec::new();
    for name in storage.partitions()? {
      if self.config.owns_partition(&name) && !own.contains(&name.as_str()) {
        storage.delete_partition(&name)?;
        removed.push(name);
      }
    }

    if !removed.is_empty() {
      info!(?removed, "deleted outdated cache partitions");
    }
    Ok(removed)
  }

  /// Run this controller as a task.
  pub(super) fn spawn(
    self,
    id: WorkerId,
    lifecycle: mpsc::UnboundedSender<LifecycleEvent>,
  ) -> WorkerHandle {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let version = self.version();
    let controller = Arc::new(self);

    tokio::spawn(async move {
      while let Some(message) = rx.recv().await {
        match message {
          WorkerMessage::Fetch { request, reply } => {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
              // Ignore send errors - the requester may have gone away
              let _ = reply.send(controller.handle(request).await);
            });
          }
          WorkerMessage::Control {
            message: ControlMessage::SkipWaiting,
            handled,
          } => {
            debug!(worker = id, "skip waiting requested");
            let _ = lifecycle.send(LifecycleEvent::SkipWaiting {
              worker: id,
              handled,
            });
          }
          WorkerMessage::Activate => {
            if let Err(err) = controller.activate() {
              warn!(worker = id, error = %err, "controller activation cleanup failed");
            }
          }
          WorkerMessage::Settle { reply } => {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
              controller.settle().await;
              let _ = reply.send(());
            });
          }
        }
      }
      debug!(worker = id, "controller stopped");
    });

    WorkerHandle { id, version, tx }
  }
}

/// Sending side of a running controller.
#[derive(Debug)]
pub(super) struct WorkerHandle {
  pub id: WorkerId,
  pub version: u32,
  tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl WorkerHandle {
  /// Deliver a message; false if the controller has stopped.
  pub fn send(&self, message: WorkerMessage) -> bool {
    self.tx.send(message).is_ok()
  }
}
