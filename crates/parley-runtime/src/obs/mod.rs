//! In-process observability.
//!
//! Metrics are atomics behind `DashMap` label maps and render to Prometheus
//! text; the binary logs them on shutdown.

pub mod metrics;

pub use metrics::MultiplexerMetrics;
