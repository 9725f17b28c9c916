use super::{DedicatedPhase, NextState, ServerContext, ServerState, Signal, SignalSender, StateKind};
use crate::approval::{ApprovalRequest, ApprovalResponse, check_approval};
use crate::error::LifecycleError;
use crate::health::HealthCheckTask;
use alloc::sync::Arc;
use beacon_hosting::{AllocationData, HostingAdapter, HostingError, HostingEvent};
use beacon_session::ClientId;
use beacon_session::events::ConnectStatus;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Forwards the events of the hosting platform to the state machine while the state is entered
#[derive(Debug)]
struct ListenerGuard {
    handle: JoinHandle<()>,
}

impl ListenerGuard {
    fn attach(mut events: broadcast::Receiver<HostingEvent>, signals: SignalSender) -> Self {
        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        trace!(?event, "Received hosting platform event");
                        if !signals.send(Signal::Hosting(event)) {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed hosting platform events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Self { handle }
    }

    async fn detach(mut self) {
        self.handle.abort();
        let _ = (&mut self.handle).await;
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Hosting governed by a hosting platform: readiness handshake, health checks, allocation and shutdown
/// requests.
pub(crate) struct DedicatedHosting {
    adapter: Arc<dyn HostingAdapter>,
    signals: SignalSender,
    phase: DedicatedPhase,
    listener: Option<ListenerGuard>,
    health: Option<HealthCheckTask>,
    ready: Option<JoinHandle<()>>,
    allocation: Option<JoinHandle<()>>,
}

impl DedicatedHosting {
    pub(crate) fn new(adapter: Arc<dyn HostingAdapter>, signals: SignalSender) -> Self {
        Self {
            adapter,
            signals,
            phase: DedicatedPhase::AwaitingReady,
            listener: None,
            health: None,
            ready: None,
            allocation: None,
        }
    }

    fn on_allocated(&mut self, game_session_id: String) {
        info!(%game_session_id, "Server allocated, fetching the allocation data");
        if let Some(previous) = self.allocation.take() {
            previous.abort();
        }
        let adapter = self.adapter.clone();
        let signals = self.signals.clone();
        self.allocation = Some(tokio::spawn(async move {
            let result = adapter.fetch_allocation_data().await;
            signals.send(Signal::AllocationFetched {
                game_session_id,
                result,
            });
        }));
    }

    fn apply_allocation(
        &mut self,
        ctx: &mut ServerContext,
        game_session_id: String,
        result: Result<AllocationData, HostingError>,
    ) {
        self.allocation = None;
        self.phase = DedicatedPhase::Allocated;
        let scene = match result {
            Ok(data) => {
                if data.max_players > 0 {
                    debug!(max_players = data.max_players, "Applying the allocated capacity");
                    ctx.config.max_connected_players = data.max_players as usize;
                }
                if data.map_name.is_empty() {
                    ctx.config.default_scene.clone()
                } else {
                    data.map_name
                }
            }
            Err(e) => {
                warn!(%game_session_id, "Could not fetch the allocation data, loading the default scene: {e}");
                ctx.config.default_scene.clone()
            }
        };
        info!(%game_session_id, %scene, "Loading the allocated scene");
        ctx.scene_loader.load_scene(&scene, true);
    }

    /// Drain the clients, notify the hosting platform and stop the process.
    ///
    /// Runs at most once per state.
    async fn graceful_shutdown(&mut self, ctx: &mut ServerContext) {
        if self.phase == DedicatedPhase::Draining {
            debug!("Shutdown already in progress");
            return;
        }
        info!("Shutting down the dedicated server");
        self.phase = DedicatedPhase::Draining;
        ctx.disconnect_all(ConnectStatus::HostEndedSession);
        if let Err(e) = self.adapter.shutdown().await {
            warn!("Could not notify the hosting platform of the shutdown: {e}");
        }
        ctx.change_state(NextState::Offline);
        ctx.terminate = true;
    }
}

#[async_trait::async_trait]
impl ServerState for DedicatedHosting {
    fn kind(&self) -> StateKind {
        StateKind::DedicatedHosting
    }

    async fn enter(&mut self, ctx: &mut ServerContext) -> Result<(), LifecycleError> {
        self.listener = Some(ListenerGuard::attach(
            self.adapter.subscribe(),
            self.signals.clone(),
        ));

        let adapter = self.adapter.clone();
        let signals = self.signals.clone();
        self.ready = Some(tokio::spawn(async move {
            let ready = match adapter.ready().await {
                Ok(()) => true,
                Err(e) => {
                    error!("Could not signal readiness to the hosting platform: {e}");
                    false
                }
            };
            signals.send(Signal::Readiness(ready));
        }));

        self.health = Some(HealthCheckTask::spawn(self.adapter.clone()));
        Ok(())
    }

    async fn exit(&mut self, ctx: &mut ServerContext) {
        // listeners first: platform events raised from now on are not for this state
        if let Some(listener) = self.listener.take() {
            listener.detach().await;
        }
        for task in [self.ready.take(), self.allocation.take()].into_iter().flatten() {
            task.abort();
        }
        if let Some(health) = self.health.take() {
            health.cancel().await;
        }
        ctx.sessions.on_hosted_session_ended();
    }

    fn on_server_stopped(&mut self, ctx: &mut ServerContext) {
        if self.phase == DedicatedPhase::Draining {
            return;
        }
        warn!("Transport stopped");
        ctx.events.publish_status(ConnectStatus::GenericDisconnect);
        ctx.change_state(NextState::Offline);
    }

    fn on_client_connected(&mut self, ctx: &mut ServerContext, client_id: ClientId) {
        ctx.publish_client_connected(client_id);
    }

    fn on_client_disconnect(&mut self, ctx: &mut ServerContext, client_id: ClientId) {
        ctx.handle_client_disconnect(client_id);
    }

    async fn on_user_requested_shutdown(&mut self, ctx: &mut ServerContext) {
        self.graceful_shutdown(ctx).await;
    }

    fn approval_check(
        &mut self,
        ctx: &mut ServerContext,
        request: &ApprovalRequest,
    ) -> ApprovalResponse {
        if self.phase == DedicatedPhase::Draining {
            return ApprovalResponse::reject(Some(ConnectStatus::HostEndedSession));
        }
        check_approval(request, ctx.transport.as_ref(), ctx.sessions.as_ref(), &ctx.config)
    }

    async fn on_signal(&mut self, ctx: &mut ServerContext, signal: Signal) {
        if self.phase == DedicatedPhase::Draining {
            trace!(?signal, "Ignoring signal while draining");
            return;
        }
        match signal {
            Signal::Readiness(ready) => {
                self.ready = None;
                if ready && self.phase == DedicatedPhase::AwaitingReady {
                    info!("Server is ready to be allocated");
                    self.phase = DedicatedPhase::Ready;
                }
            }
            Signal::Hosting(HostingEvent::Allocated { game_session_id }) => {
                self.on_allocated(game_session_id);
            }
            Signal::AllocationFetched {
                game_session_id,
                result,
            } => self.apply_allocation(ctx, game_session_id, result),
            Signal::Hosting(HostingEvent::ShutdownRequested) => {
                info!("Hosting platform requested a shutdown");
                self.graceful_shutdown(ctx).await;
            }
            Signal::AdapterInitialized(_) => {}
        }
    }

    fn dedicated_phase(&self) -> Option<DedicatedPhase> {
        Some(self.phase)
    }
}
