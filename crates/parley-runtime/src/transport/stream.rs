//! Length-prefixed stream transport.
//!
//! `StreamConnection` speaks framed envelope records over any byte stream a
//! `Dialer` produces. `TcpDialer` is the production dialer; tests plug in
//! in-memory duplex pipes.

use async_trait::async_trait;
use tokio::io::{split, AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use parley_core::error::{ParleyError, Result};
use parley_core::protocol::wire::{decode_envelope, encode_envelope};
use parley_core::protocol::{ConnectionId, Envelope};

use crate::connection::{AtomicState, Connection, ConnectionState, ProtocolFilter, SessionToken};
use crate::transport::framing::{read_frame, write_frame, DEFAULT_MAX_FRAME_BYTES};

/// Produces a fresh byte stream for each connect.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    async fn dial(&self) -> Result<Self::Stream>;

    /// Peer description for logs.
    fn peer(&self) -> String;
}

/// TCP client dialer.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    host: String,
    port: u16,
}

impl TcpDialer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    type Stream = TcpStream;

    async fn dial(&self) -> Result<TcpStream> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| ParleyError::Connection(format!("connect {}: {e}", self.peer())))?;
        stream
            .set_nodelay(true)
            .map_err(|e| ParleyError::Connection(format!("set_nodelay {}: {e}", self.peer())))?;
        Ok(stream)
    }

    fn peer(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub struct StreamConnection<D: Dialer> {
    id: ConnectionId,
    dialer: D,
    filter: ProtocolFilter,
    max_frame_bytes: usize,
    state: AtomicState,
    token: SessionToken,
    lifecycle: Mutex<()>,
    reader: Mutex<Option<ReadHalf<D::Stream>>>,
    writer: Mutex<Option<WriteHalf<D::Stream>>>,
}

impl<D: Dialer> StreamConnection<D> {
    pub fn new(id: impl Into<ConnectionId>, dialer: D) -> Self {
        Self {
            id: id.into(),
            dialer,
            filter: ProtocolFilter::allow_all(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            state: AtomicState::default(),
            token: SessionToken::default(),
            lifecycle: Mutex::new(()),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
        }
    }

    pub fn with_filter(mut self, filter: ProtocolFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }
}

#[async_trait]
impl<D: Dialer> Connection for StreamConnection<D> {
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

        let stream = match self.dialer.dial().await {
            Ok(s) => s,
            Err(e) => {
                self.state.set(ConnectionState::Disconnected);
                return Err(e);
            }
        };
        let (r, w) = split(stream);
        *self.reader.lock().await = Some(r);
        *self.writer.lock().await = Some(w);
        self.token.renew();
        self.state.set(ConnectionState::Connected);
        tracing::debug!(connection = %self.id, peer = %self.dialer.peer(), "stream connection up");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let _g = self.lifecycle.lock().await;
        if self.state.get() == ConnectionState::Disconnected && self.writer.lock().await.is_none() {
            return Ok(());
        }
        self.state.set(ConnectionState::Disconnecting);
        // unblocks a pending receive/send so their halves can be taken
        self.token.cancel();
        if let Some(mut w) = self.writer.lock().await.take() {
            let _ = w.shutdown().await;
        }
        self.reader.lock().await.take();
        self.state.set(ConnectionState::Disconnected);
        tracing::debug!(connection = %self.id, "stream connection down");
        Ok(())
    }

    async fn send(&self, envelope: Envelope) -> Result<()> {
        if !self.is_connected() {
            return Err(ParleyError::NotConnected(format!("connection {}", self.id)));
        }
        let record = encode_envelope(&envelope)?;
        if record.len() > self.max_frame_bytes {
            return Err(ParleyError::Connection(format!(
                "envelope of {} bytes exceeds frame limit {}",
                record.len(),
                self.max_frame_bytes
            )));
        }

        let token = self.token.current();
        let mut writer = self.writer.lock().await;
        let Some(w) = writer.as_mut() else {
            return Err(ParleyError::NotConnected(format!("connection {}", self.id)));
        };
        tokio::select! {
            _ = token.cancelled() => Err(ParleyError::Connection(format!("connection {} closed during send", self.id))),
            r = write_frame(w, &record) => r,
        }
    }

    async fn receive(&self) -> Option<Result<Envelope>> {
        let token = self.token.current();
        let mut reader = self.reader.lock().await;
        let r = reader.as_mut()?;
        let res = tokio::select! {
            _ = token.cancelled() => return None,
            res = read_frame(r, self.max_frame_bytes) => res,
        };
        match res {
            Ok(Some(frame)) => Some(decode_envelope(frame)),
            Ok(None) => {
                tracing::debug!(connection = %self.id, "peer closed stream");
                self.state.set(ConnectionState::Disconnected);
                None
            }
            Err(e) => {
                tracing::warn!(connection = %self.id, error = %e, "stream read failed");
                self.state.set(ConnectionState::Disconnected);
                None
            }
        }
    }
}
