//! Live-update path: credential checks, room membership and fan-out, and
//! command routing against the message store.

pub mod auth;
pub mod catalog;
pub mod connection;
pub mod registry;
pub mod router;

pub use catalog::{ChannelCatalog, StaticCatalog};
pub use registry::{ConnectionId, Registry};
pub use router::ChatRouter;
