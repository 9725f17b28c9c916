//! The network transport the server listens on, seen from the lifecycle
use crate::error::TransportError;
use beacon_session::ClientId;
use core::net::SocketAddr;
use tracing::debug;

/// Server side of the client transport.
///
/// The transport reports `server started`/`server stopped`, client connections and approval requests to
/// the [`ServerStateMachine`](crate::machine::ServerStateMachine), either by calling it directly or through
/// [`ServerEvent`](crate::machine::ServerEvent)s.
pub trait ServerTransport: Send {
    fn set_listen_address(&mut self, address: SocketAddr);

    /// Start listening, without any local client.
    ///
    /// `Ok(false)` means that the start was refused immediately.
    fn start_server(&mut self) -> Result<bool, TransportError>;

    /// Stop listening and drop every connection
    fn shutdown(&mut self);

    /// Disconnect a client, sending it the `reason`
    fn disconnect_client(&mut self, client_id: ClientId, reason: &str);

    fn connected_client_ids(&self) -> Vec<ClientId>;
}

/// How the server is reached by its clients
pub trait ConnectionMethod: Send {
    /// Configure the transport before the server starts
    fn setup_host_connection(&self, transport: &mut dyn ServerTransport) -> Result<(), TransportError>;
}

/// Clients connect directly to the ip/port the server listens on
#[derive(Debug, Clone, Copy)]
pub struct DirectIp {
    pub listen_address: SocketAddr,
}

impl DirectIp {
    pub fn new(listen_address: SocketAddr) -> Self {
        Self { listen_address }
    }
}

impl ConnectionMethod for DirectIp {
    fn setup_host_connection(&self, transport: &mut dyn ServerTransport) -> Result<(), TransportError> {
        debug!(address = %self.listen_address, "Listening with a direct ip connection");
        transport.set_listen_address(self.listen_address);
        Ok(())
    }
}
