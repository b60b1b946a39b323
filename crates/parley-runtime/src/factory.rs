//! Build connections from configuration.

use std::sync::Arc;

use parley_core::error::{ParleyError, Result};

use crate::config::{ConnectionConfig, ConnectionKind, NodeConfig};
use crate::connection::Connection;
use crate::multiplexer::Multiplexer;
use crate::transport::{LocalConnection, LocalNode, StreamConnection, TcpDialer};

/// One connection for `cfg`. `agent_address` is the owning agent; local
/// connections register it on `node`.
pub fn build_connection(
    cfg: &ConnectionConfig,
    agent_address: &str,
    node: &LocalNode,
) -> Result<Arc<dyn Connection>> {
    cfg.validate()?;
    let filter = cfg.filter()?;
    match cfg.kind {
        ConnectionKind::Local => Ok(Arc::new(
            LocalConnection::new(cfg.id.as_str(), agent_address, node.clone()).with_filter(filter),
        )),
        ConnectionKind::Tcp => {
            let (Some(host), Some(port)) = (cfg.host.as_deref(), cfg.port) else {
                return Err(ParleyError::Config(format!(
                    "connection {}: tcp requires host and port",
                    cfg.id
                )));
            };
            Ok(Arc::new(
                StreamConnection::new(cfg.id.as_str(), TcpDialer::new(host, port))
                    .with_filter(filter)
                    .with_max_frame_bytes(cfg.max_frame_bytes),
            ))
        }
    }
}

/// Multiplexer with every configured connection.
pub fn build_multiplexer(cfg: &NodeConfig, node: &LocalNode) -> Result<Multiplexer> {
    let mut builder = Multiplexer::builder(cfg.multiplexer.clone());
    for c in &cfg.connections {
        builder = builder.connection(build_connection(c, &cfg.agent.address, node)?);
    }
    builder.build()
}
