//! driftd — relay node internals.
//!
//! A node accepts websocket connections, registers each authenticated
//! client in the connection registry, routes chat frames between local
//! clients, and bridges undeliverable frames over the shared bus to the
//! other nodes of the deployment.

pub mod bus;
pub mod heartbeat;
pub mod node;
pub mod registry;
pub mod session;

pub use bus::{Bus, BusSubscription, MemoryBus};
pub use node::NodeHandle;
pub use registry::Registry;
pub use session::SessionError;
