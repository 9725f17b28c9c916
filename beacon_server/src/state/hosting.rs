use super::{NextState, ServerContext, ServerState, StateKind};
use crate::approval::{ApprovalRequest, ApprovalResponse, check_approval};
use crate::error::LifecycleError;
use beacon_session::ClientId;
use beacon_session::events::ConnectStatus;
use tracing::info;

/// The server accepts clients on its own, without a hosting platform
pub(crate) struct Hosting;

#[async_trait::async_trait]
impl ServerState for Hosting {
    fn kind(&self) -> StateKind {
        StateKind::Hosting
    }

    async fn enter(&mut self, ctx: &mut ServerContext) -> Result<(), LifecycleError> {
        let scene = ctx.config.default_scene.clone();
        ctx.scene_loader.load_scene(&scene, true);
        Ok(())
    }

    async fn exit(&mut self, ctx: &mut ServerContext) {
        ctx.sessions.on_hosted_session_ended();
    }

    fn on_server_stopped(&mut self, ctx: &mut ServerContext) {
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
        info!("Ending the hosted session");
        ctx.disconnect_all(ConnectStatus::HostEndedSession);
        ctx.change_state(NextState::Offline);
    }

    fn approval_check(
        &mut self,
        ctx: &mut ServerContext,
        request: &ApprovalRequest,
    ) -> ApprovalResponse {
        check_approval(request, ctx.transport.as_ref(), ctx.sessions.as_ref(), &ctx.config)
    }
}
