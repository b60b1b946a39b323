//! parley runtime: connections, transports and the multiplexer.
//!
//! This crate wires the transport implementations, YAML configuration and
//! metrics around the multiplexer routing core. It is consumed by the
//! `parley-node` binary and by integration tests.

pub mod config;
pub mod connection;
pub mod factory;
pub mod multiplexer;
pub mod obs;
pub mod transport;

pub use connection::{Connection, ConnectionState, ProtocolFilter};
pub use multiplexer::{Multiplexer, MultiplexerBuilder, RoutingTable};
