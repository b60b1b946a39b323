//! Scripted in-memory connection for multiplexer tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};

use parley_core::error::{ParleyError, Result};
use parley_core::protocol::{ConnectionId, Envelope, EnvelopeContext};
use parley_runtime::connection::{AtomicState, Connection, ConnectionState, ProtocolFilter, SessionToken};

pub const FIPA: &str = "fetchai/fipa:1.0.0";

pub fn envelope(to: &str, sender: &str, payload: &str, hint: Option<&str>) -> Envelope {
    Envelope::new(
        to,
        sender,
        FIPA.parse().unwrap(),
        Bytes::copy_from_slice(payload.as_bytes()),
        hint.map(EnvelopeContext::via),
    )
    .unwrap()
}

pub struct MockConnection {
    id: ConnectionId,
    filter: ProtocolFilter,
    state: AtomicState,
    token: SessionToken,
    fail_connect: bool,
    hang_disconnect: bool,
    hang_send: bool,
    pub send_calls: AtomicUsize,
    pub fail_send: AtomicBool,
    pub connect_calls: AtomicUsize,
    sent: StdMutex<Vec<Envelope>>,
    inbound_tx: StdMutex<Option<mpsc::UnboundedSender<Result<Envelope>>>>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<Result<Envelope>>>,
}

impl MockConnection {
    pub fn new(id: &str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            id: ConnectionId::new(id),
            filter: ProtocolFilter::allow_all(),
            state: AtomicState::default(),
            token: SessionToken::default(),
            fail_connect: false,
            hang_disconnect: false,
            hang_send: false,
            send_calls: AtomicUsize::new(0),
            fail_send: AtomicBool::new(false),
            connect_calls: AtomicUsize::new(0),
            sent: StdMutex::new(Vec::new()),
            inbound_tx: StdMutex::new(Some(tx)),
            inbound_rx: Mutex::new(rx),
        }
    }

    pub fn failing(id: &str) -> Self {
        Self {
            fail_connect: true,
            ..Self::new(id)
        }
    }

    pub fn hanging_on_disconnect(id: &str) -> Self {
        Self {
            hang_disconnect: true,
            ..Self::new(id)
        }
    }

    /// `send` never completes once the transport has accepted the call.
    pub fn hanging_on_send(id: &str) -> Self {
        Self {
            hang_send: true,
            ..Self::new(id)
        }
    }

    pub fn with_filter(mut self, filter: ProtocolFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Script one inbound item.
    pub fn push_inbound(&self, item: Result<Envelope>) {
        if let Some(tx) = self.inbound_tx.lock().unwrap().as_ref() {
            tx.send(item).unwrap();
        }
    }

    /// End the inbound stream: `receive()` returns `None` once drained.
    pub fn finish_inbound(&self) {
        self.inbound_tx.lock().unwrap().take();
    }

    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connection for MockConnection {
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
        if self.state.get() == ConnectionState::Connected {
            return Ok(());
        }
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(ParleyError::Connection(format!("{} refused", self.id)));
        }
        self.token.renew();
        self.state.set(ConnectionState::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if self.hang_disconnect {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.token.cancel();
        self.state.set(ConnectionState::Disconnected);
        Ok(())
    }

    async fn send(&self, envelope: Envelope) -> Result<()> {
        if !self.is_connected() {
            return Err(ParleyError::NotConnected(self.id.to_string()));
        }
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_send {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(ParleyError::Connection(format!("{} write failed", self.id)));
        }
        self.sent.lock().unwrap().push(envelope);
        Ok(())
    }

    async fn receive(&self) -> Option<Result<Envelope>> {
        let token = self.token.current();
        let mut rx = self.inbound_rx.lock().await;
        tokio::select! {
            _ = token.cancelled() => None,
            item = rx.recv() => item,
        }
    }
}
