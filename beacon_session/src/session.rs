//! Per-player session data, kept across reconnections of the same player
use crate::ClientId;
use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::{debug, error, trace};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPlayerData {
    pub client_id: ClientId,
    pub player_name: String,
    pub is_connected: bool,
}

impl SessionPlayerData {
    pub fn new(client_id: ClientId, player_name: impl Into<String>) -> Self {
        Self {
            client_id,
            player_name: player_name.into(),
            is_connected: true,
        }
    }
}

/// Session bookkeeping used by the server lifecycle.
///
/// Implementations are responsible for their own synchronization: the server calls them without any
/// additional locking.
pub trait SessionStore: Send + Sync {
    /// Register the session data of a client whose connection was approved.
    ///
    /// A player reconnecting after a disconnection recovers its previous data.
    fn setup_connecting_player(&self, client_id: ClientId, player_id: &str, data: SessionPlayerData);

    fn player_data(&self, client_id: ClientId) -> Option<SessionPlayerData>;

    fn player_data_by_id(&self, player_id: &str) -> Option<SessionPlayerData>;

    fn player_id(&self, client_id: ClientId) -> Option<String>;

    /// Is a player with this id currently connected?
    fn is_duplicate_connection(&self, player_id: &str) -> bool;

    fn disconnect_client(&self, client_id: ClientId);

    /// The hosted session is over: all the session data is discarded
    fn on_hosted_session_ended(&self);
}

#[derive(Default, Debug)]
struct SessionData {
    players: HashMap<String, SessionPlayerData>,
    client_to_player: HashMap<ClientId, String>,
    /// While a game session is in progress, disconnected players keep their data so that they can reconnect
    session_started: bool,
}

impl SessionData {
    fn is_duplicate_connection(&self, player_id: &str) -> bool {
        self.players
            .get(player_id)
            .is_some_and(|data| data.is_connected)
    }
}

/// In-memory [`SessionStore`]
#[derive(Default, Debug)]
pub struct SessionManager {
    data: RwLock<SessionData>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// A game session started: from now on disconnected players keep their data
    pub fn on_session_started(&self) {
        self.data.write().session_started = true;
    }

    /// The game session ended: the data of the players that left is discarded
    pub fn on_session_ended(&self) {
        let mut data = self.data.write();
        let SessionData {
            players,
            client_to_player,
            session_started,
        } = &mut *data;
        players.retain(|_, player| player.is_connected);
        client_to_player.retain(|_, player_id| players.contains_key(player_id));
        *session_started = false;
    }

    pub fn connected_players(&self) -> usize {
        self.data
            .read()
            .players
            .values()
            .filter(|player| player.is_connected)
            .count()
    }
}

impl SessionStore for SessionManager {
    fn setup_connecting_player(
        &self,
        client_id: ClientId,
        player_id: &str,
        player_data: SessionPlayerData,
    ) {
        let mut data = self.data.write();
        if data.is_duplicate_connection(player_id) {
            error!(player_id, "Player is already connected, ignoring the duplicate session data");
            return;
        }
        let player_data = match data.players.get(player_id) {
            Some(previous) => {
                debug!(player_id, client_id, "Player reconnected");
                SessionPlayerData {
                    client_id,
                    is_connected: true,
                    ..previous.clone()
                }
            }
            None => player_data,
        };
        trace!(player_id, client_id, "Registered session data");
        data.client_to_player.insert(client_id, player_id.to_string());
        data.players.insert(player_id.to_string(), player_data);
    }

    fn player_data(&self, client_id: ClientId) -> Option<SessionPlayerData> {
        let data = self.data.read();
        let player_id = data.client_to_player.get(&client_id)?;
        data.players.get(player_id).cloned()
    }

    fn player_data_by_id(&self, player_id: &str) -> Option<SessionPlayerData> {
        self.data.read().players.get(player_id).cloned()
    }

    fn player_id(&self, client_id: ClientId) -> Option<String> {
        self.data.read().client_to_player.get(&client_id).cloned()
    }

    fn is_duplicate_connection(&self, player_id: &str) -> bool {
        self.data.read().is_duplicate_connection(player_id)
    }

    fn disconnect_client(&self, client_id: ClientId) {
        let mut data = self.data.write();
        let Some(player_id) = data.client_to_player.get(&client_id).cloned() else {
            return;
        };
        // the player might already have reconnected with another client
        let owned_by_client = data
            .players
            .get(&player_id)
            .is_some_and(|player| player.client_id == client_id);
        if data.session_started {
            if owned_by_client {
                if let Some(player) = data.players.get_mut(&player_id) {
                    player.is_connected = false;
                }
            }
        } else {
            data.client_to_player.remove(&client_id);
            if owned_by_client {
                data.players.remove(&player_id);
            }
        }
    }

    fn on_hosted_session_ended(&self) {
        let mut data = self.data.write();
        data.players.clear();
        data.client_to_player.clear();
        data.session_started = false;
    }
}
