use super::{NextState, ServerContext, ServerState, Signal, SignalSender, StateKind};
use crate::approval::{ApprovalRequest, ApprovalResponse, approve_unconditionally};
use crate::error::LifecycleError;
use crate::transport::ConnectionMethod;
use beacon_session::events::ConnectStatus;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Starts the transport, then looks for a hosting platform
pub(crate) struct StartingServer {
    method: Option<Box<dyn ConnectionMethod>>,
    signals: SignalSender,
    /// Initialization of the hosting adapter, started once the transport is up
    initialize: Option<JoinHandle<()>>,
}

impl StartingServer {
    pub(crate) fn new(method: Option<Box<dyn ConnectionMethod>>, signals: SignalSender) -> Self {
        Self {
            method,
            signals,
            initialize: None,
        }
    }

    fn start_failed(ctx: &mut ServerContext, error: LifecycleError) -> Result<(), LifecycleError> {
        error!("Could not start the server: {error}");
        ctx.events.publish_status(ConnectStatus::StartHostFailed);
        ctx.change_state(NextState::Offline);
        Err(error)
    }

    fn host_without_platform(ctx: &mut ServerContext) {
        ctx.events.publish_status(ConnectStatus::Success);
        ctx.change_state(NextState::Hosting);
    }
}

#[async_trait::async_trait]
impl ServerState for StartingServer {
    fn kind(&self) -> StateKind {
        StateKind::StartingServer
    }

    async fn enter(&mut self, ctx: &mut ServerContext) -> Result<(), LifecycleError> {
        if let Some(method) = &self.method
            && let Err(e) = method.setup_host_connection(ctx.transport.as_mut())
        {
            return Self::start_failed(ctx, e.into());
        }
        match ctx.transport.start_server() {
            Ok(true) => {
                debug!("Transport starting");
                Ok(())
            }
            Ok(false) => Self::start_failed(ctx, LifecycleError::StartFailed),
            Err(e) => Self::start_failed(ctx, e.into()),
        }
    }

    async fn exit(&mut self, ctx: &mut ServerContext) {
        if let Some(task) = self.initialize.take() {
            task.abort();
        }
    }

    fn on_server_started(&mut self, ctx: &mut ServerContext) {
        if self.initialize.is_some() {
            debug!("Hosting adapter initialization already running");
            return;
        }
        let Some(adapter) = ctx.hosting_adapter.clone() else {
            info!("No hosting platform configured, hosting locally");
            Self::host_without_platform(ctx);
            return;
        };
        let signals = self.signals.clone();
        self.initialize = Some(tokio::spawn(async move {
            let result = adapter.initialize().await;
            signals.send(Signal::AdapterInitialized(result));
        }));
    }

    fn on_server_stopped(&mut self, ctx: &mut ServerContext) {
        warn!("Transport stopped while starting");
        ctx.events.publish_status(ConnectStatus::StartHostFailed);
        ctx.change_state(NextState::Offline);
    }

    async fn on_user_requested_shutdown(&mut self, ctx: &mut ServerContext) {
        ctx.change_state(NextState::Offline);
    }

    fn approval_check(
        &mut self,
        ctx: &mut ServerContext,
        request: &ApprovalRequest,
    ) -> ApprovalResponse {
        approve_unconditionally(request, ctx.sessions.as_ref(), &ctx.config)
    }

    async fn on_signal(&mut self, ctx: &mut ServerContext, signal: Signal) {
        let Signal::AdapterInitialized(result) = signal else {
            return;
        };
        match (result, ctx.hosting_adapter.clone()) {
            (Ok(true), Some(adapter)) => {
                info!("Connected to the hosting platform");
                ctx.events.publish_status(ConnectStatus::Success);
                ctx.change_state(NextState::DedicatedHosting(adapter));
            }
            (Ok(_), _) => {
                info!("Hosting platform unavailable, hosting locally");
                Self::host_without_platform(ctx);
            }
            (Err(e), _) => {
                warn!("Could not initialize the hosting platform, hosting locally: {e}");
                Self::host_without_platform(ctx);
            }
        }
    }
}
