//! Offline cache controller.
//!
//! Intercepts app requests and answers them from versioned cache partitions:
//! - page loads are network-first with a cached fallback
//! - scripts, styles and workers are stale-while-revalidate
//! - images are cache-first and expire after 30 days
//!
//! URLs listed for precaching are fetched when a controller installs and are
//! served from their own partition. Everything else goes straight to the
//! network. Each controller version runs as its own task behind a
//! registration, which activates new versions when asked to skip waiting or
//! when no clients remain.

mod expiration;
mod host;
mod layer;
mod network;
mod router;
mod storage;
mod traits;
mod visit;
mod worker;

#[cfg(test)]
mod testing;

pub use host::InstallState;
pub use network::HttpFetcher;
pub use storage::SqliteCacheStorage;
pub use traits::{CacheSource, Destination, Request, SystemClock};
pub use visit::{visit, Visit};

#[cfg(test)]
pub use traits::{CacheResult, Response};
