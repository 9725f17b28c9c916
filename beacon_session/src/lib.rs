/*! # Beacon Session

Bookkeeping of the players connected to a dedicated server, and the connection status
notifications that the server broadcasts to the rest of the application.
*/

pub mod events;

pub mod session;

/// Network identifier assigned to a client by the transport
pub type ClientId = u64;

pub mod prelude {
    pub use crate::ClientId;
    pub use crate::events::{
        ConnectStatus, ConnectionEvent, ConnectionEventChannel, ConnectionEventSink,
        ConnectionNotification,
    };
    pub use crate::session::{SessionManager, SessionPlayerData, SessionStore};
}
