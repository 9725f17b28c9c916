use alloc::sync::Arc;
use beacon::hosting::test_utils::{InitializeOutcome, MockHostingAdapter};
use beacon::prelude::*;
use beacon::server::test_utils::{RecordingSceneLoader, StartBehavior, TestTransport};
use bytes::Bytes;
use core::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::sync::broadcast;
use tracing::trace;

pub const SERVER_ADDR: SocketAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 7777));

/// Number of scheduler passes given to the background tasks of the server in [`ServerStepper::settle`]
const SETTLE_PASSES: usize = 16;

/// Stepper with:
/// - a [`ServerStateMachine`] listening on a [`TestTransport`]
/// - an optional [`MockHostingAdapter`] standing in for the hosting platform
///
/// The test keeps handles on every collaborator of the machine to inspect what it did.
pub struct ServerStepper {
    pub machine: ServerStateMachine,
    pub transport: TestTransport,
    pub scenes: RecordingSceneLoader,
    pub sessions: Arc<SessionManager>,
    pub events: Arc<ConnectionEventChannel>,
    pub notifications: broadcast::Receiver<ConnectionNotification>,
    pub adapter: Option<Arc<MockHostingAdapter>>,
}

impl ServerStepper {
    /// Server without hosting platform
    pub fn local() -> Self {
        Self::new(ServerConfig::default(), None, StartBehavior::Started)
    }

    /// Server whose hosting platform accepts the connection
    pub fn dedicated() -> Self {
        Self::with_adapter(MockHostingAdapter::new(InitializeOutcome::Connected))
    }

    pub fn with_adapter(adapter: MockHostingAdapter) -> Self {
        Self::new(ServerConfig::default(), Some(adapter), StartBehavior::Started)
    }

    pub fn new(config: ServerConfig, adapter: Option<MockHostingAdapter>, start: StartBehavior) -> Self {
        let transport = TestTransport::new(start);
        let scenes = RecordingSceneLoader::default();
        let sessions = Arc::new(SessionManager::new());
        let events = Arc::new(ConnectionEventChannel::default());
        let notifications = events.subscribe();
        let adapter = adapter.map(Arc::new);

        let mut builder = ServerStateMachine::builder(transport.clone())
            // clients built by the stepper are debug builds
            .with_config(config.with_debug_build(true))
            .with_sessions(sessions.clone())
            .with_events(events.clone())
            .with_scene_loader(scenes.clone());
        if let Some(adapter) = &adapter {
            builder = builder.with_hosting_adapter(adapter.clone());
        }
        Self {
            machine: builder.build(),
            transport,
            scenes,
            sessions,
            events,
            notifications,
            adapter,
        }
    }

    pub fn adapter(&self) -> &MockHostingAdapter {
        self.adapter
            .as_deref()
            .expect("the stepper was built without a hosting adapter")
    }

    /// Let the background tasks of the server run, and dispatch what they reported
    pub async fn settle(&mut self) {
        for _ in 0..SETTLE_PASSES {
            tokio::task::yield_now().await;
            let handled = self.machine.process_signals().await;
            trace!(handled, "Settled server signals");
        }
    }

    /// Start the transport and let the server pick its hosting state
    pub async fn start(&mut self) -> Result<(), LifecycleError> {
        self.machine
            .start_server(Some(Box::new(DirectIp::new(SERVER_ADDR))))
            .await?;
        self.machine.on_server_started().await;
        self.settle().await;
        Ok(())
    }

    pub fn payload(player_id: &str, player_name: &str, is_debug: bool) -> Bytes {
        ConnectionPayload::new(player_id, player_name, is_debug)
            .encode()
            .expect("the payload can be encoded")
    }

    pub fn request(client_id: ClientId, player_id: &str, is_debug: bool) -> ApprovalRequest {
        ApprovalRequest::new(client_id, Self::payload(player_id, player_id, is_debug))
    }

    /// Run a client through approval and, if it is approved, connect it.
    ///
    /// The player name is the player id.
    pub async fn connect(&mut self, client_id: ClientId, player_id: &str) -> ApprovalResponse {
        let response = self
            .machine
            .approval_check(&Self::request(client_id, player_id, true));
        if response.approved {
            self.transport.connect_client(client_id);
            self.machine.on_client_connected(client_id).await;
        }
        response
    }

    /// The transport lost a client
    pub async fn disconnect(&mut self, client_id: ClientId) {
        self.transport.drop_client(client_id);
        self.machine.on_client_disconnect(client_id).await;
    }

    /// Every notification published since the last call
    pub fn drain_notifications(&mut self) -> Vec<ConnectionNotification> {
        let mut notifications = vec![];
        while let Ok(notification) = self.notifications.try_recv() {
            notifications.push(notification);
        }
        notifications
    }

    /// Every lifecycle-level status published since the last call (player events are discarded)
    pub fn drain_statuses(&mut self) -> Vec<ConnectStatus> {
        self.drain_notifications()
            .into_iter()
            .filter_map(|notification| match notification {
                ConnectionNotification::Status(status) => Some(status),
                ConnectionNotification::Event(_) => None,
            })
            .collect()
    }
}
