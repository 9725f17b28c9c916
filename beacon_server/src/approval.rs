//! Admission of incoming client connections
use crate::config::ServerConfig;
use crate::transport::ServerTransport;
use beacon_session::ClientId;
use beacon_session::events::ConnectStatus;
use beacon_session::session::{SessionPlayerData, SessionStore};
use bevy_math::{Quat, Vec3};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Data sent by a client along with its connection request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionPayload {
    pub player_id: String,
    pub player_name: String,
    pub is_debug: bool,
}

#[derive(thiserror::Error, Debug)]
pub enum PayloadError {
    #[error("connection payload is {size} bytes, the maximum is {max}")]
    TooLarge { size: usize, max: usize },
    #[error("connection payload is not valid utf-8: {0}")]
    Utf8(#[from] core::str::Utf8Error),
    #[error("connection payload could not be decoded: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConnectionPayload {
    pub fn new(player_id: impl Into<String>, player_name: impl Into<String>, is_debug: bool) -> Self {
        Self {
            player_id: player_id.into(),
            player_name: player_name.into(),
            is_debug,
        }
    }

    /// Decode an untrusted payload. The size is checked before anything else is read.
    pub fn decode(bytes: &[u8], max_size: usize) -> Result<Self, PayloadError> {
        if bytes.len() > max_size {
            return Err(PayloadError::TooLarge {
                size: bytes.len(),
                max: max_size,
            });
        }
        let text = core::str::from_utf8(bytes)?;
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> Result<Bytes, PayloadError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

/// A client asks to join the server
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub client_id: ClientId,
    pub payload: Bytes,
}

impl ApprovalRequest {
    pub fn new(client_id: ClientId, payload: impl Into<Bytes>) -> Self {
        Self {
            client_id,
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalResponse {
    pub approved: bool,
    pub create_player_object: bool,
    pub position: Vec3,
    pub rotation: Quat,
    /// Sent back to a rejected client, as the textual name of a [`ConnectStatus`]
    pub reason: Option<String>,
}

impl ApprovalResponse {
    pub fn approve(position: Vec3, rotation: Quat) -> Self {
        Self {
            approved: true,
            create_player_object: true,
            position,
            rotation,
            reason: None,
        }
    }

    pub fn reject(status: Option<ConnectStatus>) -> Self {
        Self {
            approved: false,
            create_player_object: false,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            reason: status.map(|status| status.to_reason()),
        }
    }

    /// The rejection reason, if it is a known [`ConnectStatus`]
    pub fn status(&self) -> Option<ConnectStatus> {
        self.reason
            .as_deref()
            .and_then(|reason| reason.parse().ok())
    }
}

/// Evaluate the admission rules, in order: capacity, build type, duplicate login
pub fn connect_status(
    payload: &ConnectionPayload,
    connected_clients: usize,
    config: &ServerConfig,
    sessions: &dyn SessionStore,
) -> ConnectStatus {
    if connected_clients >= config.max_connected_players {
        return ConnectStatus::ServerFull;
    }
    if payload.is_debug != config.debug_build {
        return ConnectStatus::IncompatibleBuildType;
    }
    if sessions.is_duplicate_connection(&payload.player_id) {
        return ConnectStatus::LoggedInAgain;
    }
    ConnectStatus::Success
}

fn decode_request(request: &ApprovalRequest, config: &ServerConfig) -> Option<ConnectionPayload> {
    match ConnectionPayload::decode(&request.payload, config.max_connect_payload) {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!(client_id = request.client_id, "Rejecting connection: {e}");
            None
        }
    }
}

fn register(request: &ApprovalRequest, payload: &ConnectionPayload, sessions: &dyn SessionStore) {
    sessions.setup_connecting_player(
        request.client_id,
        &payload.player_id,
        SessionPlayerData::new(request.client_id, payload.player_name.clone()),
    );
}

/// Approval policy of the hosting states
pub fn check_approval(
    request: &ApprovalRequest,
    transport: &dyn ServerTransport,
    sessions: &dyn SessionStore,
    config: &ServerConfig,
) -> ApprovalResponse {
    let Some(payload) = decode_request(request, config) else {
        return ApprovalResponse::reject(None);
    };
    let connected = transport.connected_client_ids().len();
    let status = connect_status(&payload, connected, config, sessions);
    if status != ConnectStatus::Success {
        info!(
            client_id = request.client_id,
            player_id = %payload.player_id,
            %status,
            "Connection rejected"
        );
        return ApprovalResponse::reject(Some(status));
    }
    debug!(client_id = request.client_id, player_id = %payload.player_id, "Connection approved");
    register(request, &payload, sessions);
    ApprovalResponse::approve(config.spawn.position, config.spawn.rotation)
}

/// Approval policy while the server is starting: any well-formed payload is accepted
pub fn approve_unconditionally(
    request: &ApprovalRequest,
    sessions: &dyn SessionStore,
    config: &ServerConfig,
) -> ApprovalResponse {
    let Some(payload) = decode_request(request, config) else {
        return ApprovalResponse::reject(None);
    };
    register(request, &payload, sessions);
    ApprovalResponse::approve(config.spawn.position, config.spawn.rotation)
}
