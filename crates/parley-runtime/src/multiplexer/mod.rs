//! Multiplexer: N connections behind one inbox and one outbox.
//!
//! - One receive task per connected connection pushes into the shared inbox,
//!   preserving each connection's wire order.
//! - One dispatch task drains the outbox; every queued envelope is already
//!   bound to exactly one connection by the routing table.
//! - A single `CancellationToken` per session stops all tasks on disconnect.

pub mod engine;
pub mod routing;

pub use engine::{Multiplexer, MultiplexerBuilder};
pub use routing::{RouteSource, RoutingTable};
