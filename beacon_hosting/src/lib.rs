/*! # Beacon Hosting

Adapters between a dedicated server and the hosting platform that manages its process
(Agones, Edgegap, Multiplay, ...).

The platform drives the server through a small handshake:
1. [`HostingAdapter::initialize`] connects to the platform. Returning `false` lets the server fall back
   to ungoverned hosting.
2. [`HostingAdapter::ready`] marks the server as eligible for allocation.
3. [`HostingAdapter::health_check`] is called every [`HostingAdapter::health_check_interval`].
4. The platform raises [`HostingEvent::Allocated`] and [`HostingEvent::ShutdownRequested`].
5. [`HostingAdapter::shutdown`] acknowledges the end of the process.
*/

use core::time::Duration;
use hashbrown::HashMap;
use tokio::sync::broadcast;

#[cfg(feature = "agones")]
pub mod agones;

#[cfg(feature = "test_utils")]
pub mod test_utils;

/// Map name used when the platform doesn't specify one
pub const DEFAULT_MAP_NAME: &str = "CharSelect";

/// Errors returned by a [`HostingAdapter`]
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum HostingError {
    #[error("the hosting adapter is not initialized")]
    NotInitialized,
    #[error("the hosting platform rejected the request: {0}")]
    Rejected(String),
    #[error("the hosting platform did not answer in time")]
    Timeout,
    #[error("invalid response from the hosting platform: {0}")]
    Protocol(String),
    #[cfg(feature = "agones")]
    #[error(transparent)]
    Http(reqwest::Error),
    #[cfg(feature = "agones")]
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = core::result::Result<T, HostingError>;

/// Events raised by the hosting platform
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HostingEvent {
    /// The server was allocated to a game session
    Allocated { game_session_id: String },
    /// The platform wants the process to shut down
    ShutdownRequested,
}

/// What the platform allocated the server to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AllocationData {
    pub game_session_id: String,
    /// Empty means 'use the default level'
    pub map_name: String,
    /// A value `<= 0` means 'keep the current capacity'
    pub max_players: i32,
    pub labels: HashMap<String, String>,
}

/// Bridge between a hosting platform SDK and the server lifecycle.
///
/// All calls can fail; the lifecycle treats every error (including timeouts, which are the adapter's
/// responsibility) as non-fatal, except that a failed [`initialize`](HostingAdapter::initialize) makes the
/// server fall back to ungoverned hosting.
#[async_trait::async_trait]
pub trait HostingAdapter: Send + Sync + 'static {
    /// Connect to the hosting platform.
    ///
    /// Returns `Ok(false)` if the platform is not available.
    async fn initialize(&self) -> Result<bool>;

    /// Signal that the server is ready to be allocated
    async fn ready(&self) -> Result<()>;

    /// Notify the platform that the process is shutting down
    async fn shutdown(&self) -> Result<()>;

    /// Send a health ping
    async fn health_check(&self) -> Result<()>;

    /// How often [`health_check`](HostingAdapter::health_check) should be called
    fn health_check_interval(&self) -> Duration;

    /// Retrieve the allocation metadata (map, max players, labels)
    async fn fetch_allocation_data(&self) -> Result<AllocationData>;

    /// Register a listener for the platform events.
    ///
    /// The listener is detached when the returned receiver is dropped.
    fn subscribe(&self) -> broadcast::Receiver<HostingEvent>;
}

pub mod prelude {
    #[cfg(feature = "agones")]
    pub use crate::agones::{AgonesConfig, AgonesHostingAdapter};
    pub use crate::{AllocationData, HostingAdapter, HostingError, HostingEvent};
}
