//! In-memory doubles of the transport and scene loader
use crate::error::TransportError;
use crate::scene::SceneLoader;
use crate::transport::ServerTransport;
use alloc::sync::Arc;
use beacon_session::ClientId;
use core::net::SocketAddr;
use parking_lot::Mutex;

/// What [`TestTransport::start_server`](ServerTransport::start_server) returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartBehavior {
    #[default]
    Started,
    /// `Ok(false)`
    Refused,
    Error,
}

#[derive(Debug, Default)]
struct TransportState {
    start: StartBehavior,
    listen_address: Option<SocketAddr>,
    listening: bool,
    clients: Vec<ClientId>,
    disconnects: Vec<(ClientId, String)>,
    start_calls: usize,
    shutdown_calls: usize,
}

/// [`ServerTransport`] whose clones share the same state, so that a test can keep a handle on the
/// transport owned by the state machine.
#[derive(Debug, Clone, Default)]
pub struct TestTransport {
    state: Arc<Mutex<TransportState>>,
}

impl TestTransport {
    pub fn new(start: StartBehavior) -> Self {
        let transport = Self::default();
        transport.state.lock().start = start;
        transport
    }

    /// A client finished connecting at the transport level
    pub fn connect_client(&self, client_id: ClientId) {
        self.state.lock().clients.push(client_id);
    }

    /// The client went away on its own
    pub fn drop_client(&self, client_id: ClientId) {
        self.state.lock().clients.retain(|id| *id != client_id);
    }

    /// Every client disconnected by the server, in order, with the reason sent
    pub fn disconnects(&self) -> Vec<(ClientId, String)> {
        self.state.lock().disconnects.clone()
    }

    pub fn clients(&self) -> Vec<ClientId> {
        self.state.lock().clients.clone()
    }

    pub fn listen_address(&self) -> Option<SocketAddr> {
        self.state.lock().listen_address
    }

    pub fn is_listening(&self) -> bool {
        self.state.lock().listening
    }

    pub fn start_calls(&self) -> usize {
        self.state.lock().start_calls
    }

    pub fn shutdown_calls(&self) -> usize {
        self.state.lock().shutdown_calls
    }
}

impl ServerTransport for TestTransport {
    fn set_listen_address(&mut self, address: SocketAddr) {
        self.state.lock().listen_address = Some(address);
    }

    fn start_server(&mut self) -> Result<bool, TransportError> {
        let mut state = self.state.lock();
        state.start_calls += 1;
        match state.start {
            StartBehavior::Started => {
                state.listening = true;
                Ok(true)
            }
            StartBehavior::Refused => Ok(false),
            StartBehavior::Error => Err(TransportError::Other("scripted start failure".to_string())),
        }
    }

    fn shutdown(&mut self) {
        let mut state = self.state.lock();
        state.shutdown_calls += 1;
        state.listening = false;
        state.clients.clear();
    }

    fn disconnect_client(&mut self, client_id: ClientId, reason: &str) {
        let mut state = self.state.lock();
        state.clients.retain(|id| *id != client_id);
        state.disconnects.push((client_id, reason.to_string()));
    }

    fn connected_client_ids(&self) -> Vec<ClientId> {
        self.state.lock().clients.clone()
    }
}

/// [`SceneLoader`] recording the scenes it was asked to load
#[derive(Debug, Clone, Default)]
pub struct RecordingSceneLoader {
    loaded: Arc<Mutex<Vec<(String, bool)>>>,
}

impl RecordingSceneLoader {
    pub fn loaded(&self) -> Vec<String> {
        self.loaded
            .lock()
            .iter()
            .map(|(scene, _)| scene.clone())
            .collect()
    }

    pub fn last_networked(&self) -> Option<bool> {
        self.loaded.lock().last().map(|(_, networked)| *networked)
    }
}

impl SceneLoader for RecordingSceneLoader {
    fn load_scene(&mut self, scene_name: &str, use_network_scene_manager: bool) {
        self.loaded
            .lock()
            .push((scene_name.to_string(), use_network_scene_manager));
    }
}
