use super::{ServerContext, ServerState, StateKind};
use crate::error::LifecycleError;
use tracing::debug;

/// The transport is not running
pub(crate) struct Offline;

#[async_trait::async_trait]
impl ServerState for Offline {
    fn kind(&self) -> StateKind {
        StateKind::Offline
    }

    async fn enter(&mut self, ctx: &mut ServerContext) -> Result<(), LifecycleError> {
        debug!("Shutting down the transport");
        ctx.transport.shutdown();
        // sessions approved while starting have no hosting state to clear them
        ctx.sessions.on_hosted_session_ended();
        Ok(())
    }
}
