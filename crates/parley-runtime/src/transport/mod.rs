//! Transports.
//!
//! - `framing`: u32 length-prefixed frames over any async byte stream.
//! - `local`: in-process loopback node for tests and co-located agents.
//! - `stream`: framed envelope records over a dialed stream (TCP).

pub mod framing;
pub mod local;
pub mod stream;

pub use local::{LocalConnection, LocalNode};
pub use stream::{Dialer, StreamConnection, TcpDialer};
