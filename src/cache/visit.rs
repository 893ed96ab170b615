//! A single foreground visit.
//!
//! Each run of the app brings the registration back to where the previous
//! run left it: the version recorded as active is installed first, then the
//! configured version is installed over it. A changed version therefore
//! waits behind the old one until the visit's client closes, or until it is
//! told to skip waiting.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::host::{InstallState, Registration};
use super::storage::CacheStorage;
use super::traits::{CacheResult, Clock, ControlMessage, Fetcher, Request, Response};
use super::worker::Controller;
use crate::config::CacheConfig;

/// Outcome of one visit.
#[derive(Debug)]
pub struct Visit {
  pub result: CacheResult<Response>,
  /// Controller version that answered the request
  pub served_by: Option<u32>,
  /// Where the configured version ended up when installed
  pub installed: InstallState,
  /// Controller version active once the visit ended
  pub active: Option<u32>,
}

/// Serve `request` through the registration.
///
/// Returns only after background refreshes have landed and any promoted
/// controller has finished activating.
pub async fn visit<S: CacheStorage, F: Fetcher>(
  config: &CacheConfig,
  storage: Arc<S>,
  fetcher: Arc<F>,
  clock: Arc<dyn Clock>,
  request: Request,
  skip_waiting: bool,
) -> Result<Visit> {
  let registration = Registration::start();

  if let Some(previous) = storage.active_version(&config.family)? {
    if previous != config.version {
      let previous_config = CacheConfig {
        version: previous,
        ..config.clone()
      };
      let controller = Controller::new(
        &previous_config,
        Arc::clone(&storage),
        Arc::clone(&fetcher),
        Arc::clone(&clock),
      );
      match registration.install(controller).await {
        // Its activation cleanup must finish before the new version precaches.
        Ok(_) => registration.settle().await?,
        Err(err) => {
          warn!(version = previous, error = %err, "could not restore previous cache controller")
        }
      }
    }
  }

  let client = registration.open_client().await?;
  let installed = registration
    .install(Controller::new(config, storage, fetcher, clock))
    .await?;

  if installed == InstallState::Waiting {
    info!(version = config.version, "cache controller installed and waiting");
    if skip_waiting {
      client.post_message(ControlMessage::SkipWaiting).await?;
    }
  }

  let status = registration.status().await?;
  debug!(
    active = ?status.active,
    waiting = ?status.waiting,
    clients = status.clients,
    "registration ready"
  );
  let served_by = status.active;
  let result = client.fetch(request).await?;
  registration.settle().await?;

  client.close();
  let active = registration.status().await?.active;
  // Queued behind the promotion, so activation cleanup has run.
  registration.settle().await?;

  Ok(Visit {
    result,
    served_by,
    installed,
    active,
  })
}
