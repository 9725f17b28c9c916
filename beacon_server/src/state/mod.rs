//! Lifecycle states of the server.
//!
//! Each state owns its connection approval policy and its reaction to transport and hosting platform
//! events. States never replace themselves: they queue the next state on the [`ServerContext`] and the
//! [`ServerStateMachine`](crate::machine::ServerStateMachine) performs the transition once the current
//! handler returns.
use crate::approval::{ApprovalRequest, ApprovalResponse};
use crate::config::ServerConfig;
use crate::error::LifecycleError;
use crate::scene::SceneLoader;
use crate::transport::{ConnectionMethod, ServerTransport};
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use beacon_hosting::{AllocationData, HostingAdapter, HostingError, HostingEvent};
use beacon_session::ClientId;
use beacon_session::events::{ConnectStatus, ConnectionEvent, ConnectionEventSink};
use beacon_session::session::SessionStore;
use tokio::sync::mpsc;
use tracing::{error, trace};

pub(crate) mod dedicated;
pub(crate) mod hosting;
pub(crate) mod offline;
pub(crate) mod starting;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    Offline,
    StartingServer,
    /// Hosting without a hosting platform
    Hosting,
    /// Hosting governed by a hosting platform
    DedicatedHosting,
}

/// Progress of the handshake with the hosting platform while in [`StateKind::DedicatedHosting`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DedicatedPhase {
    /// The readiness signal was sent (or failed); the health checks run regardless
    AwaitingReady,
    Ready,
    /// The server was allocated to a game session
    Allocated,
    /// Graceful shutdown in progress
    Draining,
}

/// Completion of asynchronous work started by a state
#[derive(Debug)]
pub(crate) enum Signal {
    AdapterInitialized(Result<bool, HostingError>),
    Readiness(bool),
    Hosting(HostingEvent),
    AllocationFetched {
        game_session_id: String,
        result: Result<AllocationData, HostingError>,
    },
}

/// A [`Signal`] tagged with the state instance that produced it
#[derive(Debug)]
pub(crate) struct Envelope {
    pub(crate) epoch: u64,
    pub(crate) signal: Signal,
}

/// Handle given to a state instance so that its background tasks can report back to the machine.
///
/// Signals sent after the state was exited are dropped by the machine.
#[derive(Debug, Clone)]
pub(crate) struct SignalSender {
    epoch: u64,
    sender: mpsc::UnboundedSender<Envelope>,
}

impl SignalSender {
    pub(crate) fn new(epoch: u64, sender: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { epoch, sender }
    }

    /// Returns false if the machine is gone
    pub(crate) fn send(&self, signal: Signal) -> bool {
        self.sender
            .send(Envelope {
                epoch: self.epoch,
                signal,
            })
            .is_ok()
    }
}

/// Next state requested by the current one
pub(crate) enum NextState {
    Offline,
    StartingServer(Option<Box<dyn ConnectionMethod>>),
    Hosting,
    DedicatedHosting(Arc<dyn HostingAdapter>),
}

impl NextState {
    pub(crate) fn into_state(self, signals: SignalSender) -> Box<dyn ServerState> {
        match self {
            NextState::Offline => Box::new(offline::Offline),
            NextState::StartingServer(method) => {
                Box::new(starting::StartingServer::new(method, signals))
            }
            NextState::Hosting => Box::new(hosting::Hosting),
            NextState::DedicatedHosting(adapter) => {
                Box::new(dedicated::DedicatedHosting::new(adapter, signals))
            }
        }
    }
}

impl core::fmt::Debug for NextState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let kind = match self {
            NextState::Offline => StateKind::Offline,
            NextState::StartingServer(_) => StateKind::StartingServer,
            NextState::Hosting => StateKind::Hosting,
            NextState::DedicatedHosting(_) => StateKind::DedicatedHosting,
        };
        write!(f, "{kind:?}")
    }
}

/// Everything the states operate on
pub(crate) struct ServerContext {
    pub(crate) config: ServerConfig,
    pub(crate) transport: Box<dyn ServerTransport>,
    pub(crate) sessions: Arc<dyn SessionStore>,
    pub(crate) events: Arc<dyn ConnectionEventSink>,
    pub(crate) scene_loader: Box<dyn SceneLoader>,
    pub(crate) hosting_adapter: Option<Arc<dyn HostingAdapter>>,
    pub(crate) pending: VecDeque<NextState>,
    /// Set by the graceful shutdown of a dedicated server: the process should exit
    pub(crate) terminate: bool,
}

impl ServerContext {
    pub(crate) fn change_state(&mut self, next: NextState) {
        trace!(?next, "Queueing state change");
        self.pending.push_back(next);
    }

    /// Disconnect every connected client, last connected first
    pub(crate) fn disconnect_all(&mut self, status: ConnectStatus) {
        let reason = status.to_reason();
        for client_id in self.transport.connected_client_ids().into_iter().rev() {
            self.transport.disconnect_client(client_id, &reason);
        }
    }

    /// Announce a connected client, or kick it if it never went through approval
    pub(crate) fn publish_client_connected(&mut self, client_id: ClientId) {
        match self.sessions.player_data(client_id) {
            Some(data) => self.events.publish_event(ConnectionEvent {
                status: ConnectStatus::Success,
                player_name: data.player_name,
            }),
            None => {
                error!(client_id, "No session data for connected client, disconnecting it");
                self.transport
                    .disconnect_client(client_id, &ConnectStatus::GenericDisconnect.to_reason());
            }
        }
    }

    pub(crate) fn handle_client_disconnect(&mut self, client_id: ClientId) {
        if self.sessions.player_id(client_id).is_none() {
            return;
        }
        if let Some(data) = self.sessions.player_data(client_id) {
            self.events.publish_event(ConnectionEvent {
                status: ConnectStatus::GenericDisconnect,
                player_name: data.player_name,
            });
        }
        self.sessions.disconnect_client(client_id);
    }
}

/// Behaviour of one lifecycle state. Handlers a state doesn't care about are no-ops.
#[async_trait::async_trait]
pub(crate) trait ServerState: Send {
    fn kind(&self) -> StateKind;

    /// Only [`StateKind::StartingServer`] can fail to enter; it queues [`NextState::Offline`] first
    async fn enter(&mut self, ctx: &mut ServerContext) -> Result<(), LifecycleError> {
        Ok(())
    }

    /// Must release every listener and background task of the state before returning
    async fn exit(&mut self, ctx: &mut ServerContext) {}

    fn on_server_started(&mut self, ctx: &mut ServerContext) {}

    fn on_server_stopped(&mut self, ctx: &mut ServerContext) {}

    fn on_client_connected(&mut self, ctx: &mut ServerContext, client_id: ClientId) {}

    fn on_client_disconnect(&mut self, ctx: &mut ServerContext, client_id: ClientId) {}

    async fn on_user_requested_shutdown(&mut self, ctx: &mut ServerContext) {}

    fn approval_check(
        &mut self,
        ctx: &mut ServerContext,
        request: &ApprovalRequest,
    ) -> ApprovalResponse {
        ApprovalResponse::reject(None)
    }

    async fn on_signal(&mut self, ctx: &mut ServerContext, signal: Signal) {}

    fn dedicated_phase(&self) -> Option<DedicatedPhase> {
        None
    }
}
