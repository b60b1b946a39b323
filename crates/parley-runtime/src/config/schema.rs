use std::collections::BTreeMap;
use std::collections::HashSet;

use serde::Deserialize;

use parley_core::error::{ParleyError, Result};
use parley_core::protocol::PublicId;

use crate::connection::ProtocolFilter;
use crate::transport::framing::DEFAULT_MAX_FRAME_BYTES;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    pub version: u32,

    pub agent: AgentSection,

    #[serde(default)]
    pub multiplexer: MultiplexerConfig,

    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
}

impl NodeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(ParleyError::Config(format!(
                "unsupported config version: {}",
                self.version
            )));
        }
        self.agent.validate()?;
        if self.connections.is_empty() {
            return Err(ParleyError::Config("connections must not be empty".into()));
        }

        let mut ids = HashSet::new();
        for c in &self.connections {
            c.validate()?;
            if !ids.insert(c.id.as_str()) {
                return Err(ParleyError::Config(format!("duplicate connection id: {}", c.id)));
            }
        }

        self.multiplexer.validate()?; // value ranges

        if let Some(default) = &self.multiplexer.default_connection {
            if !ids.contains(default.as_str()) {
                return Err(ParleyError::Config(format!(
                    "multiplexer.default_connection refers to unknown connection: {default}"
                )));
            }
        }
        for (protocol, conn) in &self.multiplexer.default_routing {
            if !ids.contains(conn.as_str()) {
                return Err(ParleyError::Config(format!(
                    "multiplexer.default_routing[{protocol}] refers to unknown connection: {conn}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentSection {
    pub address: String,
}

impl AgentSection {
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(ParleyError::Config("agent.address must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MultiplexerConfig {
    #[serde(default = "default_capacity")]
    pub inbox_capacity: usize,

    #[serde(default = "default_capacity")]
    pub outbox_capacity: usize,

    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Fallback connection when neither a hint nor a protocol route applies.
    #[serde(default)]
    pub default_connection: Option<String>,

    /// protocol id (`author/name:version`) -> connection id
    #[serde(default)]
    pub default_routing: BTreeMap<String, String>,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: default_capacity(),
            outbox_capacity: default_capacity(),
            connect_timeout_ms: default_timeout_ms(),
            shutdown_timeout_ms: default_timeout_ms(),
            default_connection: None,
            default_routing: BTreeMap::new(),
        }
    }
}

impl MultiplexerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=65536).contains(&self.inbox_capacity) {
            return Err(ParleyError::Config(
                "multiplexer.inbox_capacity must be between 1 and 65536".into(),
            ));
        }
        if !(1..=65536).contains(&self.outbox_capacity) {
            return Err(ParleyError::Config(
                "multiplexer.outbox_capacity must be between 1 and 65536".into(),
            ));
        }
        if !(100..=120000).contains(&self.connect_timeout_ms) {
            return Err(ParleyError::Config(
                "multiplexer.connect_timeout_ms must be between 100 and 120000".into(),
            ));
        }
        if !(100..=120000).contains(&self.shutdown_timeout_ms) {
            return Err(ParleyError::Config(
                "multiplexer.shutdown_timeout_ms must be between 100 and 120000".into(),
            ));
        }
        for protocol in self.default_routing.keys() {
            protocol.parse::<PublicId>().map_err(|_| {
                ParleyError::Config(format!(
                    "multiplexer.default_routing key is not a protocol id: {protocol}"
                ))
            })?;
        }
        Ok(())
    }
}

fn default_capacity() -> usize {
    1024
}
fn default_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Local,
    Tcp,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    pub id: String,
    pub kind: ConnectionKind,

    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    #[serde(default)]
    pub restricted_to_protocols: Vec<String>,

    #[serde(default)]
    pub excluded_protocols: Vec<String>,
}

impl ConnectionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(ParleyError::Config("connection id must not be empty".into()));
        }
        match self.kind {
            ConnectionKind::Tcp => {
                if self.host.as_deref().map(str::is_empty).unwrap_or(true) || self.port.is_none() {
                    return Err(ParleyError::Config(format!(
                        "connection {}: tcp requires host and port",
                        self.id
                    )));
                }
            }
            ConnectionKind::Local => {
                if self.host.is_some() || self.port.is_some() {
                    return Err(ParleyError::Config(format!(
                        "connection {}: local takes no host or port",
                        self.id
                    )));
                }
            }
        }
        if !(64..=64 * 1024 * 1024).contains(&self.max_frame_bytes) {
            return Err(ParleyError::Config(format!(
                "connection {}: max_frame_bytes must be between 64 and 67108864",
                self.id
            )));
        }
        self.filter().map(|_| ())
    }

    pub fn filter(&self) -> Result<ProtocolFilter> {
        ProtocolFilter::compile(&self.restricted_to_protocols, &self.excluded_protocols)
    }
}

fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}
