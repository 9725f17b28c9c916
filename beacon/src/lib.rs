/*! # Beacon

Beacon drives the lifecycle of a dedicated game server: it starts the transport, registers the server
with a hosting platform such as Agones when one is present, reports health while the server is up,
reacts to allocations and shuts down gracefully when asked to.

Without a hosting platform the server falls back to hosting on its own.
*/
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod hosting {
    pub use beacon_hosting::*;
}

pub mod session {
    pub use beacon_session::*;
}

pub mod server {
    pub use beacon_server::*;
}

pub mod prelude {
    pub use beacon_hosting::prelude::*;
    pub use beacon_server::prelude::*;
    pub use beacon_session::prelude::*;
}
