#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use parley_runtime::config::{self, ConnectionKind};
use parley_runtime::factory;
use parley_runtime::transport::LocalNode;

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
agent:
  address: "agent_a"
connections:
  - id: "local"
    kind: local
    max_frame_byte: 4096 # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.kind().as_str(), "CONFIG");
}

#[test]
fn ok_minimal_config() {
    let ok = r#"
version: 1
agent:
  address: "agent_a"
connections:
  - id: "local"
    kind: local
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.connections[0].kind, ConnectionKind::Local);
    assert_eq!(cfg.multiplexer.inbox_capacity, 1024);
    assert!(cfg.multiplexer.default_connection.is_none());
}

#[test]
fn full_config_builds_a_multiplexer() {
    let ok = r#"
version: 1
agent:
  address: "agent_a"
multiplexer:
  connect_timeout_ms: 1000
  default_connection: "local"
  default_routing:
    "fetchai/fipa:1.0.0": "peer"
connections:
  - id: "local"
    kind: local
    excluded_protocols: ["fetchai/fipa:*"]
  - id: "peer"
    kind: tcp
    host: "127.0.0.1"
    port: 9000
    max_frame_bytes: 65536
    restricted_to_protocols: ["fetchai/*"]
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    let mux = factory::build_multiplexer(&cfg, &LocalNode::new()).expect("must build");
    let ids: Vec<String> = mux.connection_ids().iter().map(|c| c.to_string()).collect();
    assert_eq!(ids, vec!["local".to_string(), "peer".to_string()]);
    assert!(!mux.is_connected());
}

#[test]
fn tcp_requires_host_and_port() {
    let bad = r#"
version: 1
agent:
  address: "agent_a"
connections:
  - id: "peer"
    kind: tcp
    port: 9000
"#;
    let err = config::load_from_str(bad).expect_err("host missing");
    assert_eq!(err.kind().as_str(), "CONFIG");
}

#[test]
fn references_must_name_known_connections() {
    let bad = r#"
version: 1
agent:
  address: "agent_a"
multiplexer:
  default_connection: "nowhere"
connections:
  - id: "local"
    kind: local
"#;
    assert!(config::load_from_str(bad).is_err());

    let bad = r#"
version: 1
agent:
  address: "agent_a"
multiplexer:
  default_routing:
    "fetchai/fipa:1.0.0": "nowhere"
connections:
  - id: "local"
    kind: local
"#;
    assert!(config::load_from_str(bad).is_err());
}

#[test]
fn routing_keys_and_filters_must_be_protocol_ids() {
    let bad = r#"
version: 1
agent:
  address: "agent_a"
multiplexer:
  default_routing:
    "not a protocol": "local"
connections:
  - id: "local"
    kind: local
"#;
    assert_eq!(
        config::load_from_str(bad).expect_err("bad key").kind().as_str(),
        "CONFIG"
    );

    let bad = r#"
version: 1
agent:
  address: "agent_a"
connections:
  - id: "local"
    kind: local
    restricted_to_protocols: ["fipa"]
"#;
    assert_eq!(
        config::load_from_str(bad).expect_err("bad filter").kind().as_str(),
        "CONFIG"
    );
}

#[test]
fn value_ranges_are_enforced() {
    let bad = r#"
version: 1
agent:
  address: "agent_a"
multiplexer:
  inbox_capacity: 0
connections:
  - id: "local"
    kind: local
"#;
    assert!(config::load_from_str(bad).is_err());

    let bad = r#"
version: 1
agent:
  address: "agent_a"
connections:
  - id: "local"
    kind: local
  - id: "local"
    kind: local
"#;
    assert!(config::load_from_str(bad).is_err());
}
