//! In-process loopback transport.
//!
//! A `LocalNode` is a shared switchboard keyed by agent address; every
//! `LocalConnection` registers its agent's inbox on connect. Envelopes travel
//! as wire records so the local path exercises the same codec as a socket.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};

use parley_core::error::{ParleyError, Result};
use parley_core::protocol::wire::{decode_envelope, encode_envelope};
use parley_core::protocol::{Address, ConnectionId, Envelope};

use crate::connection::{AtomicState, Connection, ConnectionState, ProtocolFilter, SessionToken};

/// Default per-agent inbox depth.
pub const DEFAULT_LOCAL_CAPACITY: usize = 1024;

/// Shared switchboard. Clones refer to the same node.
#[derive(Clone, Default)]
pub struct LocalNode {
    inboxes: Arc<DashMap<Address, mpsc::Sender<Bytes>>>,
}

impl LocalNode {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, address: &str, tx: mpsc::Sender<Bytes>) -> Result<()> {
        match self.inboxes.entry(address.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(ParleyError::Connection(format!(
                "address {address} already connected to the local node"
            ))),
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(tx);
                Ok(())
            }
        }
    }

    fn unregister(&self, address: &str) {
        self.inboxes.remove(address);
    }

    pub fn is_registered(&self, address: &str) -> bool {
        self.inboxes.contains_key(address)
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.inboxes.iter().map(|e| e.key().clone()).collect()
    }

    /// Deliver an encoded record to `to`'s inbox. Waits while the inbox is
    /// full.
    pub async fn deliver(&self, to: &str, record: Bytes) -> Result<()> {
        // clone the sender so no map guard is held across the await
        let tx = self
            .inboxes
            .get(to)
            .map(|r| r.value().clone())
            .ok_or_else(|| ParleyError::Connection(format!("no local agent at {to}")))?;
        tx.send(record)
            .await
            .map_err(|_| ParleyError::Connection(format!("local agent {to} went away")))
    }
}

/// Connection of one agent to a `LocalNode`.
pub struct LocalConnection {
    id: ConnectionId,
    address: Address,
    node: LocalNode,
    filter: ProtocolFilter,
    capacity: usize,
    state: AtomicState,
    token: SessionToken,
    lifecycle: Mutex<()>,
    inbox: Mutex<Option<mpsc::Receiver<Bytes>>>,
}

impl LocalConnection {
    pub fn new(id: impl Into<ConnectionId>, address: impl Into<Address>, node: LocalNode) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            node,
            filter: ProtocolFilter::allow_all(),
            capacity: DEFAULT_LOCAL_CAPACITY,
            state: AtomicState::default(),
            token: SessionToken::default(),
            lifecycle: Mutex::new(()),
            inbox: Mutex::new(None),
        }
    }

    pub fn with_filter(mut self, filter: ProtocolFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl Connection for LocalConnection {
    fn connection_id(&self) -> &ConnectionId {
        &self.id
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    fn filter(&self) -> &ProtocolFilter {
        &self.filter
    }

    async fn connect(&self) -> Result<()> {
        let _g = self.lifecycle.lock().await;
        if self.state.get() == ConnectionState::Connected {
            return Ok(());
        }
        self.state.set(ConnectionState::Connecting);

        let (tx, rx) = mpsc::channel(self.capacity);
        if let Err(e) = self.node.register(&self.address, tx) {
            self.state.set(ConnectionState::Disconnected);
            return Err(e);
        }
        *self.inbox.lock().await = Some(rx);
        self.token.renew();
        self.state.set(ConnectionState::Connected);
        tracing::debug!(connection = %self.id, address = %self.address, "local connection up");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let _g = self.lifecycle.lock().await;
        if self.state.get() == ConnectionState::Disconnected {
            return Ok(());
        }
        self.state.set(ConnectionState::Disconnecting);
        self.node.unregister(&self.address);
        self.token.cancel();
        self.inbox.lock().await.take();
        self.state.set(ConnectionState::Disconnected);
        tracing::debug!(connection = %self.id, address = %self.address, "local connection down");
        Ok(())
    }

    async fn send(&self, envelope: Envelope) -> Result<()> {
        if !self.is_connected() {
            return Err(ParleyError::NotConnected(format!("connection {}", self.id)));
        }
        let record = encode_envelope(&envelope)?;
        let token = self.token.current();
        tokio::select! {
            _ = token.cancelled() => Err(ParleyError::Connection(format!("connection {} closed during send", self.id))),
            r = self.node.deliver(&envelope.to, record) => r,
        }
    }

    async fn receive(&self) -> Option<Result<Envelope>> {
        let token = self.token.current();
        let mut inbox = self.inbox.lock().await;
        let rx = inbox.as_mut()?;
        tokio::select! {
            _ = token.cancelled() => None,
            record = rx.recv() => record.map(decode_envelope),
        }
    }
}
