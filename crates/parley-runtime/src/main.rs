//! parley-node
//!
//! Runs one agent's multiplexer from a YAML config:
//! - connections built through the factory, connected concurrently
//! - every inbound envelope logged
//! - clean disconnect on Ctrl-C

use std::process::ExitCode;

use tracing_subscriber::{fmt, EnvFilter};

use parley_core::error::Result;
use parley_runtime::{config, factory, transport::LocalNode};

#[tokio::main]
async fn main() -> ExitCode {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "parley.yaml".to_string());
    match run(&path).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(code = e.kind().as_str(), error = %e, "parley-node failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(path: &str) -> Result<()> {
    let cfg = config::load_from_file(path)?;
    let node = LocalNode::new();
    let mux = factory::build_multiplexer(&cfg, &node)?;

    tracing::info!(agent = %cfg.agent.address, connections = cfg.connections.len(), "parley-node starting");
    mux.connect().await?;
    tracing::info!(connected = ?mux.connected_ids(), "parley-node connected");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            env = mux.recv() => match env {
                Some(env) => tracing::info!(
                    from = %env.sender,
                    to = %env.to,
                    protocol = %env.protocol_id,
                    bytes = env.payload.len(),
                    "inbound envelope"
                ),
                None => break,
            },
        }
    }

    tracing::info!("parley-node shutting down");
    mux.disconnect().await?;
    tracing::debug!(metrics = %mux.metrics().render(), "final metrics");
    Ok(())
}
