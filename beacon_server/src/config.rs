//! Defines server-specific configuration options
use bevy_math::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Hard cap on the size of a connection payload, checked before decoding it
pub const MAX_CONNECT_PAYLOAD: usize = 1024;

/// Scene loaded when the server is not told which level to run
pub const DEFAULT_SCENE: &str = beacon_hosting::DEFAULT_MAP_NAME;

pub const DEFAULT_MAX_CONNECTED_PLAYERS: usize = 8;

/// Where the player object of an approved client is created
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpawnPoint {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for SpawnPoint {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Connections are refused with `ServerFull` once this many clients are connected.
    ///
    /// Can be overridden by the hosting platform when the server is allocated.
    pub max_connected_players: usize,
    /// Clients must run the same build type (debug or release) as the server
    pub debug_build: bool,
    pub default_scene: String,
    pub max_connect_payload: usize,
    pub spawn: SpawnPoint,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connected_players: DEFAULT_MAX_CONNECTED_PLAYERS,
            debug_build: cfg!(debug_assertions),
            default_scene: DEFAULT_SCENE.to_string(),
            max_connect_payload: MAX_CONNECT_PAYLOAD,
            spawn: SpawnPoint::default(),
        }
    }
}

impl ServerConfig {
    pub fn with_max_connected_players(mut self, max_connected_players: usize) -> Self {
        self.max_connected_players = max_connected_players;
        self
    }

    pub fn with_debug_build(mut self, debug_build: bool) -> Self {
        self.debug_build = debug_build;
        self
    }

    pub fn with_default_scene(mut self, scene: impl Into<String>) -> Self {
        self.default_scene = scene.into();
        self
    }

    pub fn with_max_connect_payload(mut self, max_connect_payload: usize) -> Self {
        self.max_connect_payload = max_connect_payload;
        self
    }

    pub fn with_spawn(mut self, spawn: SpawnPoint) -> Self {
        self.spawn = spawn;
        self
    }
}
