//! Registration host: installs controller versions, decides which one is
//! active and routes client requests to it.
//!
//! The foreground never touches a controller directly. It talks to the host
//! over a channel, and the host forwards fetches and control messages to the
//! controllers it owns.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::storage::CacheStorage;
use super::traits::{CacheResult, ControlMessage, Fetcher, Request, Response};
use super::worker::{Controller, LifecycleEvent, WorkerHandle, WorkerMessage};

pub type ClientId = u64;

/// Where a freshly installed controller ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
  /// Controlling all clients
  Active,
  /// Installed behind the active controller
  Waiting,
}

/// Snapshot of the registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationStatus {
  pub active: Option<u32>,
  pub waiting: Option<u32>,
  pub clients: usize,
}

enum HostCommand {
  Install {
    worker: WorkerHandle,
    reply: oneshot::Sender<InstallState>,
  },
  OpenClient {
    reply: oneshot::Sender<ClientId>,
  },
  CloseClient {
    id: ClientId,
  },
  Fetch {
    request: Request,
    reply: oneshot::Sender<Result<CacheResult<Response>>>,
  },
  PostMessage {
    message: ControlMessage,
    handled: oneshot::Sender<()>,
  },
  Status {
    reply: oneshot::Sender<RegistrationStatus>,
  },
  Settle {
    reply: oneshot::Sender<()>,
  },
}

/// Handle to the registration host task.
#[derive(Clone)]
pub struct Registration {
  commands: mpsc::UnboundedSender<HostCommand>,
  lifecycle: mpsc::UnboundedSender<LifecycleEvent>,
  next_worker: Arc<AtomicU64>,
}

impl Registration {
  /// Start the host task. Must be called inside a tokio runtime.
  pub fn start() -> Self {
    let (commands, command_rx) = mpsc::unbounded_channel();
    let (lifecycle, lifecycle_rx) = mpsc::unbounded_channel();

    tokio::spawn(Host::default().run(command_rx, lifecycle_rx));

    Self {
      commands,
      lifecycle,
      next_worker: Arc::new(AtomicU64::new(1)),
    }
  }

  /// Install a controller version.
  ///
  /// The controller first fills its precache; if that fails nothing is
  /// installed. With no active controller, or no open clients, it activates
  /// at once; otherwise it waits until all clients close or it is told to
  /// skip waiting.
  pub async fn install<S: CacheStorage, F: Fetcher>(
    &self,
    controller: Controller<S, F>,
  ) -> Result<InstallState> {
    controller.install().await?;
    let id = self.next_worker.fetch_add(1, Ordering::Relaxed);
    let worker = controller.spawn(id, self.lifecycle.clone());
    self
      .request(|reply| HostCommand::Install { worker, reply })
      .await
  }

  /// Open a client (a page) whose requests the active controller handles.
  pub async fn open_client(&self) -> Result<Client> {
    let id = self.request(|reply| HostCommand::OpenClient { reply }).await?;
    Ok(Client {
      id,
      registration: self.clone(),
    })
  }

  pub async fn status(&self) -> Result<RegistrationStatus> {
    self.request(|reply| HostCommand::Status { reply }).await
  }

  /// Wait until the active controller's background refreshes have landed.
  pub async fn settle(&self) -> Result<()> {
    self.request(|reply| HostCommand::Settle { reply }).await
  }

  async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> HostCommand) -> Result<T> {
    let (tx, rx) = oneshot::channel();
    self
      .commands
      .send(build(tx))
      .map_err(|_| eyre!("Registration host has stopped"))?;
    rx.await
      .map_err(|_| eyre!("Registration host dropped the request"))
  }
}

/// An open page. Closing it (or dropping it) lets a waiting controller take over.
pub struct Client {
  id: ClientId,
  registration: Registration,
}

impl Client {
  /// Send `request` through the active controller.
  pub async fn fetch(&self, request: Request) -> Result<CacheResult<Response>> {
    self
      .registration
      .request(|reply| HostCommand::Fetch { request, reply })
      .await?
  }

  /// Post a control message to the newest installed controller and wait
  /// until the registration has acted on it.
  pub async fn post_message(&self, message: ControlMessage) -> Result<()> {
    self
      .registration
      .request(|handled| HostCommand::PostMessage { message, handled })
      .await
      .map_err(|_| eyre!("No cache controller received {:?}", message))
  }

  pub fn close(self) {
    // Drop does the work.
  }
}

impl Drop for Client {
  fn drop(&mut self) {
    let _ = self
      .registration
      .commands
      .send(HostCommand::CloseClient { id: self.id });
  }
}

#[derive(Default)]
struct Host {
  active: Option<WorkerHandle>,
  waiting: Option<WorkerHandle>,
  clients: HashSet<ClientId>,
  next_client: ClientId,
}

impl Host {
  async fn run(
    mut self,
    mut commands: mpsc::UnboundedReceiver<HostCommand>,
    mut lifecycle: mpsc::UnboundedReceiver<LifecycleEvent>,
  ) {
    loop {
      tokio::select! {
        command = commands.recv() => match command {
          Some(command) => self.handle_command(command),
          None => break,
        },
        Some(event) = lifecycle.recv() => self.handle_lifecycle(event),
      }
    }
    debug!("registration host stopped");
  }

  fn handle_command(&mut self, command: HostCommand) {
    match command {
      HostCommand::Install { worker, reply } => {
        let state = self.install(worker);
        let _ = reply.send(state);
      }
      HostCommand::OpenClient { reply } => {
        self.next_client += 1;
        self.clients.insert(self.next_client);
        let _ = reply.send(self.next_client);
      }
      HostCommand::CloseClient { id } => {
        self.clients.remove(&id);
        if self.clients.is_empty() && self.waiting.is_some() {
          self.promote_waiting();
        }
      }
      HostCommand::Fetch { request, reply } => match &self.active {
        Some(active) => {
          let url = request.url.clone();
          if !active.send(WorkerMessage::Fetch { request, reply }) {
            debug!(url = %url, "active controller stopped before handling request");
          }
        }
        None => {
          let _ = reply.send(Err(eyre!("No active cache controller")));
        }
      },
      HostCommand::PostMessage { message, handled } => {
        if let Some(target) = self.waiting.as_ref().or(self.active.as_ref()) {
          target.send(WorkerMessage::Control { message, handled });
        }
      }
      HostCommand::Status { reply } => {
        let _ = reply.send(RegistrationStatus {
          active: self.active.as_ref().map(|w| w.version),
          waiting: self.waiting.as_ref().map(|w| w.version),
          clients: self.clients.len(),
        });
      }
      HostCommand::Settle { reply } => match &self.active {
        Some(active) => {
          active.send(WorkerMessage::Settle { reply });
        }
        None => {
          let _ = reply.send(());
        }
      },
    }
  }

  fn handle_lifecycle(&mut self, event: LifecycleEvent) {
    match event {
      LifecycleEvent::SkipWaiting { worker, handled } => {
        if self.waiting.as_ref().is_some_and(|w| w.id == worker) {
          self.promote_waiting();
        }
        let _ = handled.send(());
      }
    }
  }

  fn install(&mut self, worker: WorkerHandle) -> InstallState {
    if self.active.is_none() || self.clients.is_empty() {
      self.activate(worker);
      return InstallState::Active;
    }

    if let Some(replaced) = self.waiting.replace(worker) {
      debug!(version = %replaced.version, "discarding superseded waiting controller");
    }
    InstallState::Waiting
  }

  fn promote_waiting(&mut self) {
    if let Some(worker) = self.waiting.take() {
      self.activate(worker);
    }
  }

  // The new controller claims every client; the old one stops once its
  // channel closes.
  fn activate(&mut self, worker: WorkerHandle) {
    worker.send(WorkerMessage::Activate);
    info!(version = %worker.version, worker = worker.id, "cache controller activated");
    self.active = Some(worker);
  }
}
