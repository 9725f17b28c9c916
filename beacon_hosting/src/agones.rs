//! [`HostingAdapter`] for [Agones](https://agones.dev).
//!
//! The adapter talks to the Agones SDK sidecar that runs in the same pod as the game server, through the
//! REST gateway exposed on `localhost:$AGONES_SDK_HTTP_PORT`.
//!
//! Allocation and shutdown are detected by watching the `GameServer` resource: the sidecar streams one
//! JSON document per line every time the resource changes.
use crate::{AllocationData, DEFAULT_MAP_NAME, HostingAdapter, HostingError, HostingEvent, Result};
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use hashbrown::HashMap;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

pub const SESSION_ID_LABEL: &str = "agones.dev/session-id";
pub const MAP_LABEL: &str = "agones.dev/map";
pub const MAX_PLAYERS_LABEL: &str = "agones.dev/max-players";

/// Port of the sidecar REST gateway when `AGONES_SDK_HTTP_PORT` is not set
pub const DEFAULT_SDK_HTTP_PORT: u16 = 9358;
pub const DEFAULT_MAX_PLAYERS: i32 = 8;

const ALLOCATED_STATE: &str = "Allocated";
const SHUTDOWN_STATE: &str = "Shutdown";

const EVENT_CHANNEL_CAPACITY: usize = 16;
/// Largest `GameServer` update accepted from the watch stream
const MAX_WATCH_LINE_LEN: usize = 64 * 1024;

impl From<reqwest::Error> for HostingError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            HostingError::Timeout
        } else {
            HostingError::Http(value)
        }
    }
}

#[derive(Clone, Debug)]
pub struct AgonesConfig {
    /// Base url of the sidecar REST gateway
    pub sdk_url: String,
    pub health_check_interval: Duration,
    /// Timeout applied to every request except the long-lived watch stream
    pub request_timeout: Duration,
    /// Delay before re-opening the watch stream after it ended
    pub watch_reconnect_delay: Duration,
    /// Used when the `agones.dev/map` label is missing
    pub default_map: String,
    /// Used when the `agones.dev/max-players` label is missing or invalid
    pub default_max_players: i32,
}

impl Default for AgonesConfig {
    fn default() -> Self {
        Self {
            sdk_url: sdk_url(DEFAULT_SDK_HTTP_PORT),
            health_check_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(2),
            watch_reconnect_delay: Duration::from_secs(1),
            default_map: DEFAULT_MAP_NAME.to_string(),
            default_max_players: DEFAULT_MAX_PLAYERS,
        }
    }
}

fn sdk_url(port: u16) -> String {
    format!("http://localhost:{port}")
}

impl AgonesConfig {
    /// Default configuration, using the sidecar port advertised in `AGONES_SDK_HTTP_PORT`
    pub fn from_env() -> Self {
        let port = std::env::var("AGONES_SDK_HTTP_PORT")
            .ok()
            .and_then(|port| port.parse().ok())
            .unwrap_or(DEFAULT_SDK_HTTP_PORT);
        Self::default().with_sdk_port(port)
    }

    pub fn with_sdk_port(mut self, port: u16) -> Self {
        self.sdk_url = sdk_url(port);
        self
    }

    pub fn with_sdk_url(mut self, sdk_url: impl Into<String>) -> Self {
        self.sdk_url = sdk_url.into();
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_default_map(mut self, map: impl Into<String>) -> Self {
        self.default_map = map.into();
        self
    }

    pub fn with_default_max_players(mut self, max_players: i32) -> Self {
        self.default_max_players = max_players;
        self
    }
}

/// Subset of the Agones `GameServer` resource that the adapter reads
#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct GameServer {
    #[serde(alias = "objectMeta")]
    pub object_meta: ObjectMeta,
    pub status: GameServerStatus,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct ObjectMeta {
    pub name: String,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct GameServerStatus {
    pub state: String,
}

/// One line of the `/watch/gameserver` stream
#[derive(Deserialize, Debug)]
struct WatchUpdate {
    result: GameServer,
}

impl GameServer {
    pub fn session_id(&self) -> String {
        self.object_meta
            .labels
            .get(SESSION_ID_LABEL)
            .cloned()
            .unwrap_or_default()
    }

    /// Read the allocation metadata from the labels, falling back to the configured defaults
    pub fn allocation_data(&self, config: &AgonesConfig) -> AllocationData {
        let labels = &self.object_meta.labels;
        AllocationData {
            game_session_id: self.session_id(),
            map_name: labels
                .get(MAP_LABEL)
                .cloned()
                .unwrap_or_else(|| config.default_map.clone()),
            max_players: labels
                .get(MAX_PLAYERS_LABEL)
                .and_then(|max_players| max_players.trim().parse().ok())
                .unwrap_or(config.default_max_players),
            labels: labels.clone(),
        }
    }
}

/// Turns the stream of `GameServer` updates into [`HostingEvent`]s.
///
/// The stream repeats the full resource on every change (labels, player counts, ...), so only
/// changes of `status.state` produce an event.
#[derive(Default, Debug)]
pub(crate) struct GameServerWatcher {
    last_state: Option<String>,
}

impl GameServerWatcher {
    pub(crate) fn observe(&mut self, game_server: &GameServer) -> Option<HostingEvent> {
        let state = game_server.status.state.as_str();
        if self.last_state.as_deref() == Some(state) {
            return None;
        }
        trace!(previous = ?self.last_state, state, "Agones GameServer state changed");
        self.last_state = Some(state.to_string());
        match state {
            ALLOCATED_STATE => Some(HostingEvent::Allocated {
                game_session_id: game_server.session_id(),
            }),
            SHUTDOWN_STATE => Some(HostingEvent::ShutdownRequested),
            _ => None,
        }
    }
}

pub struct AgonesHostingAdapter {
    config: AgonesConfig,
    client: reqwest::Client,
    events: broadcast::Sender<HostingEvent>,
    watch: Mutex<Option<JoinHandle<()>>>,
    initialized: AtomicBool,
}

impl AgonesHostingAdapter {
    pub fn new(config: AgonesConfig) -> Result<Self> {
        // no client-wide timeout: the watch request stays open for the lifetime of the server
        let client = reqwest::Client::builder().build()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            config,
            client,
            events,
            watch: Mutex::new(None),
            initialized: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &AgonesConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.sdk_url.trim_end_matches('/'), path)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(HostingError::NotInitialized)
        }
    }

    async fn post_empty(&self, path: &str) -> Result<()> {
        self.client
            .post(self.url(path))
            .timeout(self.config.request_timeout)
            .json(&serde_json::json!({}))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Fetch the current `GameServer` resource from the sidecar
    pub async fn game_server(&self) -> Result<GameServer> {
        let game_server = self
            .client
            .get(self.url("gameserver"))
            .timeout(self.config.request_timeout)
            .send()
            .await?
            .error_for_status()?
            .json::<GameServer>()
            .await?;
        Ok(game_server)
    }

    fn start_watch(&self) {
        let client = self.client.clone();
        let url = self.url("watch/gameserver");
        let events = self.events.clone();
        let reconnect_delay = self.config.watch_reconnect_delay;
        let handle = tokio::spawn(watch_game_server(client, url, events, reconnect_delay));
        if let Some(previous) = self.watch.lock().replace(handle) {
            previous.abort();
        }
    }
}

async fn watch_game_server(
    client: reqwest::Client,
    url: String,
    events: broadcast::Sender<HostingEvent>,
    reconnect_delay: Duration,
) {
    let mut watcher = GameServerWatcher::default();
    loop {
        match stream_updates(&client, &url, &events, &mut watcher).await {
            Ok(()) => debug!("Agones watch stream ended, reconnecting"),
            Err(e) => warn!(error = %e, "Agones watch stream failed, reconnecting"),
        }
        tokio::time::sleep(reconnect_delay).await;
    }
}

async fn stream_updates(
    client: &reqwest::Client,
    url: &str,
    events: &broadcast::Sender<HostingEvent>,
    watcher: &mut GameServerWatcher,
) -> Result<()> {
    let mut response = client.get(url).send().await?.error_for_status()?;
    let mut lines = LineBuffer::default();
    while let Some(chunk) = response.chunk().await? {
        for line in lines.push(&chunk) {
            let line = line.trim_ascii();
            if line.is_empty() {
                continue;
            }
            let update = match serde_json::from_slice::<WatchUpdate>(line) {
                Ok(update) => update,
                Err(e) => {
                    warn!(error = %e, "Could not parse Agones GameServer update");
                    continue;
                }
            };
            if let Some(event) = watcher.observe(&update.result) {
                info!(?event, "Agones GameServer event");
                // no receiver just means that nobody is listening to the platform right now
                let _ = events.send(event);
            }
        }
        // a sidecar that never ends its line would grow the buffer forever
        lines.check_pending()?;
    }
    Ok(())
}

/// Splits the watch stream into lines
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append a chunk and return every line it completed, newline included
    fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(chunk);
        let mut lines = vec![];
        while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            lines.push(self.pending.drain(..=end).collect());
        }
        lines
    }

    /// Fails once the unterminated line exceeds [`MAX_WATCH_LINE_LEN`]
    fn check_pending(&self) -> Result<()> {
        if self.pending.len() > MAX_WATCH_LINE_LEN {
            return Err(HostingError::Protocol(format!(
                "GameServer update longer than {MAX_WATCH_LINE_LEN} bytes"
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl HostingAdapter for AgonesHostingAdapter {
    async fn initialize(&self) -> Result<bool> {
        match self.game_server().await {
            Ok(game_server) => {
                info!(
                    name = %game_server.object_meta.name,
                    state = %game_server.status.state,
                    "Connected to the Agones sidecar"
                );
                self.initialized.store(true, Ordering::Release);
                self.start_watch();
                Ok(true)
            }
            Err(e) => {
                warn!(error = %e, url = %self.config.sdk_url, "Failed to connect to the Agones sidecar");
                Ok(false)
            }
        }
    }

    async fn ready(&self) -> Result<()> {
        self.ensure_initialized()?;
        self.post_empty("ready").await?;
        info!("Marked as Ready on Agones");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.ensure_initialized()?;
        self.post_empty("shutdown").await?;
        info!("Agones acknowledged the shutdown");
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        self.ensure_initialized()?;
        self.post_empty("health").await
    }

    fn health_check_interval(&self) -> Duration {
        self.config.health_check_interval
    }

    async fn fetch_allocation_data(&self) -> Result<AllocationData> {
        if self.ensure_initialized().is_err() {
            return Ok(GameServer::default().allocation_data(&self.config));
        }
        let game_server = self.game_server().await?;
        Ok(game_server.allocation_data(&self.config))
    }

    fn subscribe(&self) -> broadcast::Receiver<HostingEvent> {
        self.events.subscribe()
    }
}

impl Drop for AgonesHostingAdapter {
    fn drop(&mut self) {
        if let Some(watch) = self.watch.get_mut().take() {
            watch.abort();
        }
    }
}
