//! Node config loader (strict parsing).

pub mod schema;

use std::fs;

use parley_core::error::{ParleyError, Result};

pub use schema::{AgentSection, ConnectionConfig, ConnectionKind, MultiplexerConfig, NodeConfig};

pub fn load_from_file(path: &str) -> Result<NodeConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| ParleyError::Config(format!("read config {path} failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<NodeConfig> {
    let cfg: NodeConfig = serde_yaml::from_str(s)
        .map_err(|e| ParleyError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
