//! Owner of the current lifecycle state
use crate::approval::{ApprovalRequest, ApprovalResponse};
use crate::config::ServerConfig;
use crate::error::LifecycleError;
use crate::scene::{LogSceneLoader, SceneLoader};
use crate::state::{
    DedicatedPhase, Envelope, NextState, ServerContext, ServerState, SignalSender, StateKind,
};
use crate::transport::{ConnectionMethod, ServerTransport};
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use beacon_hosting::HostingAdapter;
use beacon_session::ClientId;
use beacon_session::events::{ConnectionEventChannel, ConnectionEventSink};
use beacon_session::session::{SessionManager, SessionStore};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

/// Events fed to [`ServerStateMachine::run`] by the transport and the operator
#[derive(Debug)]
pub enum ServerEvent {
    ServerStarted,
    ServerStopped,
    ClientConnected(ClientId),
    ClientDisconnected(ClientId),
    ApprovalRequested {
        request: ApprovalRequest,
        respond: oneshot::Sender<ApprovalResponse>,
    },
    ShutdownRequested,
}

/// Why [`ServerStateMachine::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The dedicated server was shut down: the process should exit
    Shutdown,
    /// An operator shutdown took a locally hosted server offline
    Stopped,
    /// Every sender of [`ServerEvent`]s was dropped
    EventsClosed,
}

pub struct ServerStateMachineBuilder {
    transport: Box<dyn ServerTransport>,
    config: ServerConfig,
    sessions: Option<Arc<dyn SessionStore>>,
    events: Option<Arc<dyn ConnectionEventSink>>,
    scene_loader: Option<Box<dyn SceneLoader>>,
    hosting_adapter: Option<Arc<dyn HostingAdapter>>,
}

impl ServerStateMachineBuilder {
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_sessions(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn ConnectionEventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_scene_loader(mut self, scene_loader: impl SceneLoader + 'static) -> Self {
        self.scene_loader = Some(Box::new(scene_loader));
        self
    }

    /// Without an adapter the server always hosts locally
    pub fn with_hosting_adapter(mut self, adapter: Arc<dyn HostingAdapter>) -> Self {
        self.hosting_adapter = Some(adapter);
        self
    }

    /// The machine starts [`StateKind::Offline`]
    pub fn build(self) -> ServerStateMachine {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let ctx = ServerContext {
            config: self.config,
            transport: self.transport,
            sessions: self
                .sessions
                .unwrap_or_else(|| Arc::new(SessionManager::new())),
            events: self
                .events
                .unwrap_or_else(|| Arc::new(ConnectionEventChannel::default())),
            scene_loader: self
                .scene_loader
                .unwrap_or_else(|| Box::new(LogSceneLoader::default())),
            hosting_adapter: self.hosting_adapter,
            pending: VecDeque::new(),
            terminate: false,
        };
        ServerStateMachine {
            state: NextState::Offline.into_state(SignalSender::new(0, signal_tx.clone())),
            ctx,
            signal_tx,
            signal_rx,
            epoch: 0,
        }
    }
}

/// Holds the current [`StateKind`] and serializes everything that can change it.
///
/// Every handler runs to completion, including the state transitions it requested, before the next
/// one is accepted. Asynchronous work started by a state (hosting platform calls, platform events)
/// comes back as signals, which are dispatched by [`process_signals`](Self::process_signals),
/// [`next_signal`](Self::next_signal) or [`run`](Self::run). Signals from a state that was exited in
/// the meantime are dropped.
pub struct ServerStateMachine {
    state: Box<dyn ServerState>,
    ctx: ServerContext,
    signal_tx: mpsc::UnboundedSender<Envelope>,
    signal_rx: mpsc::UnboundedReceiver<Envelope>,
    /// Identifies the current state instance
    epoch: u64,
}

impl ServerStateMachine {
    pub fn builder(transport: impl ServerTransport + 'static) -> ServerStateMachineBuilder {
        ServerStateMachineBuilder {
            transport: Box::new(transport),
            config: ServerConfig::default(),
            sessions: None,
            events: None,
            scene_loader: None,
            hosting_adapter: None,
        }
    }

    pub fn current_state(&self) -> StateKind {
        self.state.kind()
    }

    /// `None` unless the server is in [`StateKind::DedicatedHosting`]
    pub fn dedicated_phase(&self) -> Option<DedicatedPhase> {
        self.state.dedicated_phase()
    }

    /// True once a dedicated server completed its graceful shutdown
    pub fn is_terminated(&self) -> bool {
        self.ctx.terminate
    }

    pub fn config(&self) -> &ServerConfig {
        &self.ctx.config
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.ctx.sessions
    }

    /// Start the transport. Only allowed while [`StateKind::Offline`].
    ///
    /// Returns an error if the transport could not be started, in which case the server is back
    /// [`StateKind::Offline`].
    pub async fn start_server(
        &mut self,
        method: Option<Box<dyn ConnectionMethod>>,
    ) -> Result<(), LifecycleError> {
        let current = self.current_state();
        if current != StateKind::Offline {
            warn!(state = ?current, "Ignoring start request, the server is not offline");
            return Err(LifecycleError::InvalidState(current));
        }
        info!("Starting the server");
        self.ctx.change_state(NextState::StartingServer(method));
        self.apply_transitions().await
    }

    pub async fn on_server_started(&mut self) {
        self.state.on_server_started(&mut self.ctx);
        self.settle().await;
    }

    pub async fn on_server_stopped(&mut self) {
        self.state.on_server_stopped(&mut self.ctx);
        self.settle().await;
    }

    pub async fn on_client_connected(&mut self, client_id: ClientId) {
        self.state.on_client_connected(&mut self.ctx, client_id);
        self.settle().await;
    }

    pub async fn on_client_disconnect(&mut self, client_id: ClientId) {
        self.state.on_client_disconnect(&mut self.ctx, client_id);
        self.settle().await;
    }

    /// Operator-requested shutdown
    pub async fn request_shutdown(&mut self) {
        self.state.on_user_requested_shutdown(&mut self.ctx).await;
        self.settle().await;
    }

    /// Decide whether a connecting client is accepted. Never waits on anything.
    pub fn approval_check(&mut self, request: &ApprovalRequest) -> ApprovalResponse {
        self.state.approval_check(&mut self.ctx, request)
    }

    /// Dispatch every signal already received, without waiting. Returns the number of signals handled.
    pub async fn process_signals(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(envelope) = self.signal_rx.try_recv() {
            self.dispatch(envelope).await;
            handled += 1;
        }
        handled
    }

    /// Wait for the next signal and dispatch it
    pub async fn next_signal(&mut self) {
        // the machine holds a sender: the channel is never closed
        if let Some(envelope) = self.signal_rx.recv().await {
            self.dispatch(envelope).await;
        }
    }

    /// Drive the machine from a stream of [`ServerEvent`]s until the server shuts down, an operator shutdown
    /// leaves it offline, or the stream ends
    pub async fn run(mut self, mut events: mpsc::Receiver<ServerEvent>) -> Termination {
        enum Input {
            Event(Option<ServerEvent>),
            Signal(Envelope),
        }

        loop {
            if self.ctx.terminate {
                info!("Server shut down");
                return Termination::Shutdown;
            }
            let input = tokio::select! {
                event = events.recv() => Input::Event(event),
                Some(envelope) = self.signal_rx.recv() => Input::Signal(envelope),
            };
            match input {
                Input::Signal(envelope) => self.dispatch(envelope).await,
                Input::Event(None) => {
                    debug!("Server event stream closed");
                    return Termination::EventsClosed;
                }
                Input::Event(Some(event)) => {
                    let stopping = matches!(event, ServerEvent::ShutdownRequested)
                        && self.current_state() != StateKind::Offline;
                    self.handle_event(event).await;
                    if stopping && !self.ctx.terminate && self.current_state() == StateKind::Offline {
                        info!("Server stopped by the operator");
                        return Termination::Stopped;
                    }
                }
            }
        }
    }

    async fn handle_event(&mut self, event: ServerEvent) {
        trace!(?event, "Handling server event");
        match event {
            ServerEvent::ServerStarted => self.on_server_started().await,
            ServerEvent::ServerStopped => self.on_server_stopped().await,
            ServerEvent::ClientConnected(client_id) => self.on_client_connected(client_id).await,
            ServerEvent::ClientDisconnected(client_id) => self.on_client_disconnect(client_id).await,
            ServerEvent::ApprovalRequested { request, respond } => {
                let response = self.approval_check(&request);
                if respond.send(response).is_err() {
                    debug!(client_id = request.client_id, "Approval requester is gone");
                }
            }
            ServerEvent::ShutdownRequested => self.request_shutdown().await,
        }
    }

    async fn dispatch(&mut self, envelope: Envelope) {
        if envelope.epoch != self.epoch {
            trace!(signal = ?envelope.signal, "Dropping signal from a previous state");
            return;
        }
        self.state.on_signal(&mut self.ctx, envelope.signal).await;
        self.settle().await;
    }

    /// Apply the transitions requested by a handler. Failures were already reported by the state.
    async fn settle(&mut self) {
        let _ = self.apply_transitions().await;
    }

    /// Exit the current state, then enter the next one, until no transition is pending.
    ///
    /// Returns the first error raised while entering a state.
    async fn apply_transitions(&mut self) -> Result<(), LifecycleError> {
        let mut result = Ok(());
        while let Some(next) = self.ctx.pending.pop_front() {
            self.state.exit(&mut self.ctx).await;
            let previous = self.state.kind();
            self.epoch += 1;
            self.state = next.into_state(SignalSender::new(self.epoch, self.signal_tx.clone()));
            info!(?previous, current = ?self.state.kind(), "Server state changed");
            if let Err(e) = self.state.enter(&mut self.ctx).await
                && result.is_ok()
            {
                result = Err(e);
            }
        }
        result
    }
}
