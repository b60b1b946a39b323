use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use parley_core::error::{ParleyError, Result};
use parley_core::protocol::{ConnectionId, Envelope, EnvelopeContext, Message, Protocol};

use crate::config::MultiplexerConfig;
use crate::connection::{Connection, ConnectionState};
use crate::multiplexer::routing::RoutingTable;
use crate::obs::MultiplexerMetrics;

/// One queued outbound envelope, already bound to its connection.
struct Outbound {
    envelope: Envelope,
    connection: Arc<dyn Connection>,
    reply: Option<oneshot::Sender<Result<()>>>,
}

#[derive(Default)]
struct Lifecycle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    config: MultiplexerConfig,
    routing: RoutingTable,
    connections: DashMap<ConnectionId, Arc<dyn Connection>>,
    metrics: Arc<MultiplexerMetrics>,
    running: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
    /// Token of the current connect/disconnect cycle, readable without
    /// awaiting the lifecycle lock. Cancelled by `disconnect`.
    session: std::sync::Mutex<CancellationToken>,
    inbox_tx: mpsc::Sender<Envelope>,
    inbox_rx: Mutex<mpsc::Receiver<Envelope>>,
    outbox_tx: mpsc::Sender<Outbound>,
    outbox_rx: Arc<Mutex<mpsc::Receiver<Outbound>>>,
}

impl Inner {
    fn session(&self) -> CancellationToken {
        match self.session.lock() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_session(&self, token: CancellationToken) {
        match self.session.lock() {
            Ok(mut g) => *g = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }

    /// Fail every queued outbound envelope. Returns how many were dropped.
    async fn drain_outbox(&self) -> usize {
        let mut dropped = 0usize;
        let mut rx = self.outbox_rx.lock().await;
        while let Ok(item) = rx.try_recv() {
            dropped += 1;
            if let Some(reply) = item.reply {
                let _ = reply.send(Err(ParleyError::Connection(
                    "multiplexer disconnected before send".into(),
                )));
            }
        }
        dropped
    }
}

/// Builder for a `Multiplexer`.
pub struct MultiplexerBuilder {
    config: MultiplexerConfig,
    routing: Option<RoutingTable>,
    connections: Vec<Arc<dyn Connection>>,
}

impl MultiplexerBuilder {
    pub fn new(config: MultiplexerConfig) -> Self {
        Self {
            config,
            routing: None,
            connections: Vec::new(),
        }
    }

    pub fn connection(mut self, connection: Arc<dyn Connection>) -> Self {
        self.connections.push(connection);
        self
    }

    /// Replace the routing table derived from the config.
    pub fn routing(mut self, routing: RoutingTable) -> Self {
        self.routing = Some(routing);
        self
    }

    pub fn build(self) -> Result<Multiplexer> {
        self.config.validate()?;
        let routing = match self.routing {
            Some(r) => r,
            None => RoutingTable::from_config(&self.config)?,
        };

        let connections = DashMap::new();
        for c in self.connections {
            let id = c.connection_id().clone();
            if connections.insert(id.clone(), c).is_some() {
                return Err(ParleyError::Config(format!("duplicate connection id: {id}")));
            }
        }
        if let Some(missing) = routing.referenced().find(|id| !connections.contains_key(*id)) {
            return Err(ParleyError::Config(format!(
                "routing refers to unknown connection: {missing}"
            )));
        }

        let (inbox_tx, inbox_rx) = mpsc::channel(self.config.inbox_capacity);
        let (outbox_tx, outbox_rx) = mpsc::channel(self.config.outbox_capacity);
        let metrics = Arc::new(MultiplexerMetrics::default());
        for id in connections.iter().map(|e| e.key().clone()) {
            metrics.connection_up.set(&[("connection", id.as_str())], 0);
        }

        Ok(Multiplexer {
            inner: Arc::new(Inner {
                config: self.config,
                routing,
                connections,
                metrics,
                running: AtomicBool::new(false),
                lifecycle: Mutex::new(Lifecycle::default()),
                session: std::sync::Mutex::new(CancellationToken::new()),
                inbox_tx,
                inbox_rx: Mutex::new(inbox_rx),
                outbox_tx,
                outbox_rx: Arc::new(Mutex::new(outbox_rx)),
            }),
        })
    }
}

/// Owns a set of connections: one merged inbox, one dispatching outbox.
///
/// Clones share the same multiplexer.
#[derive(Clone)]
pub struct Multiplexer {
    inner: Arc<Inner>,
}

impl Multiplexer {
    pub fn builder(config: MultiplexerConfig) -> MultiplexerBuilder {
        MultiplexerBuilder::new(config)
    }

    /// True between a successful `connect` and the next `disconnect`.
    pub fn is_connected(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> Arc<MultiplexerMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.inner.connections.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn connected_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self
            .inner
            .connections
            .iter()
            .filter(|e| e.value().is_connected())
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn connection_state(&self, id: &ConnectionId) -> Option<ConnectionState> {
        self.inner.connections.get(id).map(|c| c.value().state())
    }

    /// Connect every connection concurrently and start the receive and
    /// dispatch tasks. Fails only if no connection comes up. A second call
    /// while connected is a no-op.
    pub async fn connect(&self) -> Result<()> {
        let mut lc = self.inner.lifecycle.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        let limit = Duration::from_millis(self.inner.config.connect_timeout_ms);
        let all: Vec<Arc<dyn Connection>> =
            self.inner.connections.iter().map(|e| Arc::clone(e.value())).collect();

        let mut pending = FuturesUnordered::new();
        for conn in all {
            pending.push(async move {
                let res = match timeout(limit, conn.connect()).await {
                    Ok(r) => r,
                    Err(_) => Err(ParleyError::Connection(format!(
                        "connect timed out after {}ms",
                        limit.as_millis()
                    ))),
                };
                (conn, res)
            });
        }

        let mut up = Vec::new();
        let mut failed = Vec::new();
        while let Some((conn, res)) = pending.next().await {
            match res {
                Ok(()) => up.push(conn),
                Err(e) => {
                    tracing::warn!(connection = %conn.connection_id(), error = %e, "connection failed to connect");
                    failed.push(conn);
                }
            }
        }
        // a timed-out or half-open transport must not linger
        for conn in &failed {
            if let Err(e) = conn.disconnect().await {
                tracing::debug!(connection = %conn.connection_id(), error = %e, "cleanup after failed connect");
            }
        }

        if up.is_empty() {
            return Err(ParleyError::Connection(
                "multiplexer could not connect any connection".into(),
            ));
        }
        if !failed.is_empty() {
            tracing::warn!(up = up.len(), failed = failed.len(), "multiplexer partially connected");
        }

        // left behind by senders that raced the last disconnect
        let stale = self.inner.drain_outbox().await;
        if stale > 0 {
            tracing::debug!(stale, "dropped envelopes queued by the previous session");
        }

        let token = CancellationToken::new();
        self.inner.set_session(token.clone());
        let mut tasks = Vec::with_capacity(up.len() + 1);
        for conn in up {
            self.inner
                .metrics
                .connection_up
                .set(&[("connection", conn.connection_id().as_str())], 1);
            tasks.push(tokio::spawn(receive_loop(
                conn,
                self.inner.inbox_tx.clone(),
                token.clone(),
                Arc::clone(&self.inner.metrics),
            )));
        }
        tasks.push(tokio::spawn(dispatch_loop(
            Arc::clone(&self.inner.outbox_rx),
            token.clone(),
            Arc::clone(&self.inner.metrics),
        )));

        *lc = Lifecycle { token, tasks };
        self.inner.running.store(true, Ordering::Release);
        tracing::debug!(connected = ?self.connected_ids(), "multiplexer connected");
        Ok(())
    }

    /// Stop all tasks (bounded by `shutdown_timeout_ms`), disconnect every
    /// connection and clear the queues. Idempotent.
    pub async fn disconnect(&self) -> Result<()> {
        let mut lc = self.inner.lifecycle.lock().await;
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let deadline = Instant::now() + Duration::from_millis(self.inner.config.shutdown_timeout_ms);

        lc.token.cancel();
        for mut task in std::mem::take(&mut lc.tasks) {
            if timeout_at(deadline, &mut task).await.is_err() {
                tracing::warn!("multiplexer task did not stop in time; aborting");
                task.abort();
                let _ = task.await;
            }
        }

        let all: Vec<Arc<dyn Connection>> =
            self.inner.connections.iter().map(|e| Arc::clone(e.value())).collect();
        let mut pending = FuturesUnordered::new();
        for conn in all {
            pending.push(async move {
                let res = timeout_at(deadline, conn.disconnect()).await;
                (conn, res)
            });
        }
        while let Some((conn, res)) = pending.next().await {
            let id = conn.connection_id();
            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(connection = %id, error = %e, "disconnect failed"),
                Err(_) => tracing::warn!(connection = %id, "disconnect timed out"),
            }
            self.inner.metrics.connection_up.set(&[("connection", id.as_str())], 0);
        }

        let dropped_out = self.inner.drain_outbox().await;
        let mut dropped_in = 0usize;
        // a consumer parked in recv() holds the inbox; leave it to them
        if let Ok(mut rx) = self.inner.inbox_rx.try_lock() {
            while rx.try_recv().is_ok() {
                dropped_in += 1;
            }
        }
        tracing::debug!(dropped_out, dropped_in, "multiplexer disconnected");
        Ok(())
    }

    /// Resolve the connection for `env`: hint, protocol route, default.
    fn route(&self, env: &Envelope) -> Result<Arc<dyn Connection>> {
        let fail = |reason: &str, e: ParleyError| {
            self.inner.metrics.routing_failures.inc(&[("reason", reason)]);
            tracing::warn!(to = %env.to, protocol = %env.protocol_id, reason, error = %e, "routing failed");
            e
        };

        let (id, source) = self.inner.routing.resolve(env).map_err(|e| fail("no_route", e))?;
        let conn = match self.inner.connections.get(&id) {
            Some(c) => Arc::clone(c.value()),
            None => {
                return Err(fail(
                    "unknown_connection",
                    ParleyError::Routing(format!("unknown connection {id} ({} route)", source.as_str())),
                ))
            }
        };
        if !conn.is_connected() {
            return Err(fail(
                "not_connected",
                ParleyError::Routing(format!("connection {id} is not connected ({} route)", source.as_str())),
            ));
        }
        if !conn.filter().is_allowed(&env.protocol_id) {
            return Err(fail(
                "filtered",
                ParleyError::Routing(format!("connection {id} does not carry {}", env.protocol_id)),
            ));
        }
        Ok(conn)
    }

    /// Queue `envelope` for dispatch. Waiting on a full outbox gives up
    /// when `session` is cancelled.
    async fn enqueue(
        &self,
        envelope: Envelope,
        reply: Option<oneshot::Sender<Result<()>>>,
        session: &CancellationToken,
    ) -> Result<()> {
        if !self.is_connected() {
            return Err(ParleyError::NotConnected("multiplexer".into()));
        }
        let connection = self.route(&envelope)?;
        let item = Outbound {
            envelope,
            connection,
            reply,
        };
        tokio::select! {
            biased;
            _ = session.cancelled() => Err(ParleyError::Connection(
                "multiplexer disconnected before send".into(),
            )),
            res = self.inner.outbox_tx.send(item) => {
                res.map_err(|_| ParleyError::Internal("outbox closed".into()))
            }
        }
    }

    /// Route now, send in the background. Routing errors return
    /// immediately; transport errors are logged and counted.
    pub async fn put(&self, envelope: Envelope) -> Result<()> {
        self.enqueue(envelope, None, &self.inner.session()).await
    }

    /// Route, send and wait for the chosen connection's result. Resolves
    /// with `Connection` once `disconnect` starts, even if the envelope
    /// is still queued.
    pub async fn send(&self, envelope: Envelope) -> Result<()> {
        let session = self.inner.session();
        let (tx, rx) = oneshot::channel();
        self.enqueue(envelope, Some(tx), &session).await?;
        tokio::select! {
            biased;
            res = rx => res
                .map_err(|_| ParleyError::Connection("multiplexer stopped before send".into()))?,
            _ = session.cancelled() => Err(ParleyError::Connection(
                "multiplexer disconnected before send".into(),
            )),
        }
    }

    /// Seal `message` into an envelope and `put` it.
    pub async fn put_message<P: Protocol>(
        &self,
        message: &Message<P>,
        context: Option<EnvelopeContext>,
    ) -> Result<()> {
        self.put(Envelope::seal(message, context)?).await
    }

    /// Next inbound envelope. Cancel-safe.
    pub async fn recv(&self) -> Option<Envelope> {
        self.inner.inbox_rx.lock().await.recv().await
    }

    /// Inbound envelope if one is ready.
    pub fn try_recv(&self) -> Option<Envelope> {
        self.inner.inbox_rx.try_lock().ok()?.try_recv().ok()
    }

    pub async fn recv_timeout(&self, wait: Duration) -> Option<Envelope> {
        timeout(wait, self.recv()).await.ok().flatten()
    }
}

async fn receive_loop(
    conn: Arc<dyn Connection>,
    inbox: mpsc::Sender<Envelope>,
    token: CancellationToken,
    metrics: Arc<MultiplexerMetrics>,
) {
    let id = conn.connection_id().clone();
    let labels = [("connection", id.as_str())];
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => break,
            next = conn.receive() => next,
        };
        match next {
            Some(Ok(env)) => {
                metrics.envelopes_in.inc(&labels);
                tokio::select! {
                    _ = token.cancelled() => break,
                    sent = inbox.send(env) => if sent.is_err() { break },
                }
            }
            Some(Err(e)) => {
                metrics.decode_errors.inc(&labels);
                tracing::warn!(connection = %id, error = %e, "dropping undecodable inbound data");
            }
            None => {
                tracing::debug!(connection = %id, "connection receive ended");
                metrics.connection_up.set(&labels, 0);
                break;
            }
        }
    }
}

async fn dispatch_loop(
    outbox: Arc<Mutex<mpsc::Receiver<Outbound>>>,
    token: CancellationToken,
    metrics: Arc<MultiplexerMetrics>,
) {
    let mut rx = outbox.lock().await;
    loop {
        let item = tokio::select! {
            _ = token.cancelled() => break,
            item = rx.recv() => item,
        };
        let Some(item) = item else { break };

        let id = item.connection.connection_id().clone();
        let started = std::time::Instant::now();
        let res = tokio::select! {
            _ = token.cancelled() => Err(ParleyError::Connection("multiplexer disconnected during send".into())),
            r = item.connection.send(item.envelope) => r,
        };
        metrics.send_duration.observe(&[("connection", id.as_str())], started.elapsed());

        match &res {
            Ok(()) => metrics.envelopes_out.inc(&[("connection", id.as_str())]),
            Err(e) => {
                metrics
                    .send_errors
                    .inc(&[("connection", id.as_str()), ("code", e.kind().as_str())]);
                tracing::error!(connection = %id, error = %e, "send failed");
            }
        }
        if let Some(reply) = item.reply {
            let _ = reply.send(res);
        }
    }
}
