//! Connection status notifications
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Outcome of a connection attempt, or reason for a disconnection.
///
/// Sent to rejected clients as the disconnect reason, and broadcast to the local application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectStatus {
    Success,
    /// Can't join, the server is already at capacity
    ServerFull,
    /// Client build type is incompatible with the server
    IncompatibleBuildType,
    /// Logged in from another client, this one was kicked
    LoggedInAgain,
    /// Server disconnected, without a specific reason
    GenericDisconnect,
    /// The server intentionally ended the session
    HostEndedSession,
    /// The server could not be started
    StartHostFailed,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("unknown connect status: {0}")]
pub struct UnknownConnectStatus(pub String);

impl ConnectStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConnectStatus::Success => "Success",
            ConnectStatus::ServerFull => "ServerFull",
            ConnectStatus::IncompatibleBuildType => "IncompatibleBuildType",
            ConnectStatus::LoggedInAgain => "LoggedInAgain",
            ConnectStatus::GenericDisconnect => "GenericDisconnect",
            ConnectStatus::HostEndedSession => "HostEndedSession",
            ConnectStatus::StartHostFailed => "StartHostFailed",
        }
    }

    /// Encode the status as a disconnect/rejection reason sent to a client
    pub fn to_reason(&self) -> String {
        self.as_str().to_string()
    }

    /// Decode a reason received from the server
    pub fn from_reason(reason: &[u8]) -> Result<Self, UnknownConnectStatus> {
        let reason = core::str::from_utf8(reason)
            .map_err(|_| UnknownConnectStatus(String::from_utf8_lossy(reason).into_owned()))?;
        reason.trim().parse()
    }
}

impl fmt::Display for ConnectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectStatus {
    type Err = UnknownConnectStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Success" => ConnectStatus::Success,
            "ServerFull" => ConnectStatus::ServerFull,
            "IncompatibleBuildType" => ConnectStatus::IncompatibleBuildType,
            "LoggedInAgain" => ConnectStatus::LoggedInAgain,
            "GenericDisconnect" => ConnectStatus::GenericDisconnect,
            "HostEndedSession" => ConnectStatus::HostEndedSession,
            "StartHostFailed" => ConnectStatus::StartHostFailed,
            other => return Err(UnknownConnectStatus(other.to_string())),
        })
    }
}

/// A player connected or disconnected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEvent {
    pub status: ConnectStatus,
    pub player_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionNotification {
    /// Lifecycle-level status of the server itself
    Status(ConnectStatus),
    /// Status change of a specific player
    Event(ConnectionEvent),
}

/// Where the server publishes connection notifications for the rest of the application
pub trait ConnectionEventSink: Send + Sync {
    fn publish_status(&self, status: ConnectStatus);

    fn publish_event(&self, event: ConnectionEvent);
}

/// [`ConnectionEventSink`] backed by a broadcast channel: every subscriber receives every notification
/// published after it subscribed.
#[derive(Debug, Clone)]
pub struct ConnectionEventChannel {
    sender: broadcast::Sender<ConnectionNotification>,
}

impl Default for ConnectionEventChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl ConnectionEventChannel {
    /// Subscribers that lag more than `capacity` notifications behind lose the oldest ones.
    ///
    /// A capacity of 0 is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionNotification> {
        self.sender.subscribe()
    }

    fn publish(&self, notification: ConnectionNotification) {
        trace!(?notification, "Publishing connection notification");
        // no subscriber is not an error
        let _ = self.sender.send(notification);
    }
}

impl ConnectionEventSink for ConnectionEventChannel {
    fn publish_status(&self, status: ConnectStatus) {
        self.publish(ConnectionNotification::Status(status));
    }

    fn publish_event(&self, event: ConnectionEvent) {
        self.publish(ConnectionNotification::Event(event));
    }
}
