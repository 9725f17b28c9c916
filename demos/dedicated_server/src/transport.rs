use beacon::prelude::*;
use core::net::SocketAddr;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Default)]
struct LoopbackState {
    address: Option<SocketAddr>,
    listening: bool,
    clients: Vec<ClientId>,
}

/// Transport without sockets: clients are registered in-process and lifecycle events go straight to
/// the server event stream.
#[derive(Clone)]
pub(crate) struct LoopbackTransport {
    events: mpsc::Sender<ServerEvent>,
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackTransport {
    pub(crate) fn new(events: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            events,
            state: Arc::default(),
        }
    }

    /// A client finished connecting
    pub(crate) fn accept(&self, client_id: ClientId) {
        self.state.lock().clients.push(client_id);
    }

    fn notify(&self, event: ServerEvent) {
        if let Err(e) = self.events.try_send(event) {
            warn!("Could not notify the server: {e}");
        }
    }
}

impl ServerTransport for LoopbackTransport {
    fn set_listen_address(&mut self, address: SocketAddr) {
        self.state.lock().address = Some(address);
    }

    fn start_server(&mut self) -> Result<bool, TransportError> {
        let mut state = self.state.lock();
        let Some(address) = state.address else {
            return Err(TransportError::Other("no listen address".to_string()));
        };
        info!(%address, "Listening");
        state.listening = true;
        drop(state);
        self.notify(ServerEvent::ServerStarted);
        Ok(true)
    }

    fn shutdown(&mut self) {
        let mut state = self.state.lock();
        if state.listening {
            info!("Transport shut down");
        }
        state.listening = false;
        state.clients.clear();
    }

    fn disconnect_client(&mut self, client_id: ClientId, reason: &str) {
        debug!(client_id, reason, "Disconnecting client");
        self.state.lock().clients.retain(|id| *id != client_id);
        self.notify(ServerEvent::ClientDisconnected(client_id));
    }

    fn connected_client_ids(&self) -> Vec<ClientId> {
        self.state.lock().clients.clone()
    }
}
