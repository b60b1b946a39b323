//! Connection contract.
//!
//! A connection is one independent transport owned by a multiplexer. All
//! methods take `&self` so the multiplexer can run a receive task and the
//! dispatch task against the same instance.

pub mod filter;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use parley_core::error::Result;
use parley_core::protocol::{ConnectionId, Envelope};

pub use filter::ProtocolFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Disconnecting => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Disconnecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Lock-free connection state cell shared by transport implementations.
#[derive(Debug)]
pub struct AtomicState(AtomicU8);

impl Default for AtomicState {
    fn default() -> Self {
        Self(AtomicU8::new(ConnectionState::Disconnected.to_u8()))
    }
}

impl AtomicState {
    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, s: ConnectionState) {
        self.0.store(s.to_u8(), Ordering::Release);
    }

    /// Move `from -> to`; false if the current state was not `from`.
    pub fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.0
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Cancellation token for the current session of a connection. Renewed on
/// every successful connect so a past disconnect does not poison the next
/// session.
#[derive(Debug, Default)]
pub struct SessionToken(Mutex<CancellationToken>);

impl SessionToken {
    pub fn current(&self) -> CancellationToken {
        match self.0.lock() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn renew(&self) {
        let fresh = CancellationToken::new();
        match self.0.lock() {
            Ok(mut g) => *g = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
    }

    pub fn cancel(&self) {
        self.current().cancel();
    }
}

/// One pluggable transport.
#[async_trait]
pub trait Connection: Send + Sync {
    fn connection_id(&self) -> &ConnectionId;

    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Protocols this connection may carry.
    fn filter(&self) -> &ProtocolFilter;

    /// Idempotent: a connected instance returns `Ok(())` without side effects.
    async fn connect(&self) -> Result<()>;

    /// Idempotent and safe after a partial connect failure.
    async fn disconnect(&self) -> Result<()>;

    /// Fails with `NotConnected` unless connected.
    async fn send(&self, envelope: Envelope) -> Result<()>;

    /// Next inbound envelope. `Some(Err(_))` reports undecodable data and the
    /// caller keeps reading; `None` means the connection has shut down.
    async fn receive(&self) -> Option<Result<Envelope>>;
}
