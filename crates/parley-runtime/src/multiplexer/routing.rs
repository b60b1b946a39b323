//! Outbound route resolution.
//!
//! Priority: explicit `context.connection_id` hint, then the per-protocol
//! default route, then the single default connection. Anything else is a
//! routing error; no connection is ever picked implicitly.

use std::collections::HashMap;

use parley_core::error::{ParleyError, Result};
use parley_core::protocol::{ConnectionId, Envelope, ProtocolId};

use crate::config::MultiplexerConfig;

/// Which rule selected a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSource {
    Hint,
    Protocol,
    Default,
}

impl RouteSource {
    pub fn as_str(self) -> &'static str {
        match self {
            RouteSource::Hint => "hint",
            RouteSource::Protocol => "protocol",
            RouteSource::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    by_protocol: HashMap<ProtocolId, ConnectionId>,
    default_connection: Option<ConnectionId>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(cfg: &MultiplexerConfig) -> Result<Self> {
        let mut table = Self::new();
        for (protocol, conn) in &cfg.default_routing {
            let protocol: ProtocolId = protocol
                .parse()
                .map_err(|_| ParleyError::Config(format!("invalid routing protocol id: {protocol}")))?;
            table = table.route(protocol, conn.as_str());
        }
        if let Some(default) = &cfg.default_connection {
            table = table.with_default(default.as_str());
        }
        Ok(table)
    }

    pub fn route(mut self, protocol: ProtocolId, connection: impl Into<ConnectionId>) -> Self {
        self.by_protocol.insert(protocol, connection.into());
        self
    }

    pub fn with_default(mut self, connection: impl Into<ConnectionId>) -> Self {
        self.default_connection = Some(connection.into());
        self
    }

    pub fn default_connection(&self) -> Option<&ConnectionId> {
        self.default_connection.as_ref()
    }

    /// Every connection id the table refers to.
    pub fn referenced(&self) -> impl Iterator<Item = &ConnectionId> + '_ {
        self.by_protocol.values().chain(self.default_connection.iter())
    }

    /// Candidate connection for `env`. Presence and liveness are checked by
    /// the caller.
    pub fn resolve(&self, env: &Envelope) -> Result<(ConnectionId, RouteSource)> {
        if let Some(hint) = env.connection_id() {
            return Ok((hint.clone(), RouteSource::Hint));
        }
        if let Some(id) = self.by_protocol.get(&env.protocol_id) {
            return Ok((id.clone(), RouteSource::Protocol));
        }
        if let Some(id) = &self.default_connection {
            return Ok((id.clone(), RouteSource::Default));
        }
        Err(ParleyError::Routing(format!(
            "no route for protocol {} to {}",
            env.protocol_id, env.to
        )))
    }
}
