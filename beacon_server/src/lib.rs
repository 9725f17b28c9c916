/*! # Beacon Server

Lifecycle of a dedicated game server: starting the transport, registering with an optional hosting
platform, accepting clients, reporting health and shutting down.

The [`ServerStateMachine`](machine::ServerStateMachine) owns the current [`StateKind`](state::StateKind)
and routes transport events, operator requests and hosting platform events to it.

```text
 Offline --start_server--> StartingServer --server started--> DedicatedHosting (hosting adapter connected)
    ^                            |                       \--> Hosting          (no hosting platform)
    |                            | start failed / stopped
    +----------------------------+-------------------------- shutdown / server stopped
```
*/

extern crate alloc;

pub mod approval;

pub mod config;

pub mod error;

pub(crate) mod health;

pub mod machine;

pub mod scene;

pub mod state;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub mod transport;

pub mod prelude {
    pub use crate::approval::{ApprovalRequest, ApprovalResponse, ConnectionPayload, PayloadError};
    pub use crate::config::{ServerConfig, SpawnPoint};
    pub use crate::error::{LifecycleError, TransportError};
    pub use crate::machine::{ServerEvent, ServerStateMachine, ServerStateMachineBuilder, Termination};
    pub use crate::scene::{LogSceneLoader, SceneLoader};
    pub use crate::state::{DedicatedPhase, StateKind};
    pub use crate::transport::{ConnectionMethod, DirectIp, ServerTransport};
}
