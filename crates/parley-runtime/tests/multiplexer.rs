#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{envelope, MockConnection, FIPA};
use parley_core::error::ParleyError;
use parley_core::fipa::{Description, Fipa, FipaBody, FipaDialogues, FipaEndState, Query};
use parley_core::protocol::{ConnectionId, EnvelopeContext};
use parley_runtime::config::MultiplexerConfig;
use parley_runtime::connection::{Connection, ConnectionState, ProtocolFilter};
use parley_runtime::multiplexer::{Multiplexer, RoutingTable};
use parley_runtime::transport::{LocalConnection, LocalNode};

const WAIT: Duration = Duration::from_secs(2);

fn config_with_default(default: &str) -> MultiplexerConfig {
    MultiplexerConfig {
        default_connection: Some(default.to_string()),
        ..MultiplexerConfig::default()
    }
}

fn mux(cfg: MultiplexerConfig, conns: &[Arc<MockConnection>]) -> Multiplexer {
    let mut b = Multiplexer::builder(cfg);
    for c in conns {
        b = b.connection(c.clone());
    }
    b.build().expect("build")
}

async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn hint_overrides_default_connection() {
    let alpha = Arc::new(MockConnection::new("alpha"));
    let beta = Arc::new(MockConnection::new("beta"));
    let m = mux(config_with_default("alpha"), &[alpha.clone(), beta.clone()]);
    m.connect().await.unwrap();

    m.send(envelope("agent_b", "agent_a", "hello", Some("beta"))).await.unwrap();
    m.send(envelope("agent_b", "agent_a", "plain", None)).await.unwrap();

    let on_beta = beta.sent();
    let on_alpha = alpha.sent();
    assert_eq!(on_beta.len(), 1);
    assert_eq!(&on_beta[0].payload[..], b"hello");
    assert_eq!(on_alpha.len(), 1);
    assert_eq!(&on_alpha[0].payload[..], b"plain");

    m.disconnect().await.unwrap();
}

#[tokio::test]
async fn partial_connect_keeps_live_connections_and_refuses_dead_route() {
    let alpha = Arc::new(MockConnection::failing("alpha"));
    let beta = Arc::new(MockConnection::new("beta"));
    let m = mux(config_with_default("beta"), &[alpha.clone(), beta.clone()]);

    m.connect().await.expect("one live connection is enough");
    assert!(m.is_connected());
    assert_eq!(m.connected_ids(), vec![ConnectionId::new("beta")]);
    assert_eq!(
        m.connection_state(&ConnectionId::new("alpha")),
        Some(ConnectionState::Disconnected)
    );

    let err = m
        .put(envelope("agent_b", "agent_a", "x", Some("alpha")))
        .await
        .expect_err("alpha is down");
    assert!(matches!(err, ParleyError::Routing(_)));
    assert_eq!(
        m.metrics().routing_failures.get(&[("reason", "not_connected")]),
        1
    );
    assert!(alpha.sent().is_empty());

    m.send(envelope("agent_b", "agent_a", "y", None)).await.unwrap();
    assert_eq!(beta.sent().len(), 1);
    m.disconnect().await.unwrap();
}

#[tokio::test]
async fn connect_fails_when_nothing_comes_up() {
    let alpha = Arc::new(MockConnection::failing("alpha"));
    let beta = Arc::new(MockConnection::failing("beta"));
    let m = mux(MultiplexerConfig::default(), &[alpha, beta]);

    let err = m.connect().await.expect_err("no live connection");
    assert_eq!(err.kind().as_str(), "CONNECTION");
    assert!(!m.is_connected());
}

#[tokio::test]
async fn second_connect_is_a_no_op() {
    let alpha = Arc::new(MockConnection::new("alpha"));
    let m = mux(MultiplexerConfig::default(), &[alpha.clone()]);
    m.connect().await.unwrap();
    m.connect().await.unwrap();
    assert_eq!(alpha.connect_calls.load(Ordering::SeqCst), 1);
    m.disconnect().await.unwrap();
}

#[tokio::test]
async fn put_preserves_order_per_connection() {
    let alpha = Arc::new(MockConnection::new("alpha"));
    let m = mux(config_with_default("alpha"), &[alpha.clone()]);
    m.connect().await.unwrap();

    for i in 0..50 {
        m.put(envelope("agent_b", "agent_a", &i.to_string(), None)).await.unwrap();
    }
    eventually(|| alpha.sent().len() == 50).await;

    let got: Vec<String> = alpha
        .sent()
        .iter()
        .map(|e| String::from_utf8(e.payload.to_vec()).unwrap())
        .collect();
    let want: Vec<String> = (0..50).map(|i| i.to_string()).collect();
    assert_eq!(got, want);
    assert_eq!(m.metrics().envelopes_out.get(&[("connection", "alpha")]), 50);
    m.disconnect().await.unwrap();
}

#[tokio::test]
async fn undecodable_inbound_is_counted_and_skipped() {
    let alpha = Arc::new(MockConnection::new("alpha"));
    let m = mux(MultiplexerConfig::default(), &[alpha.clone()]);
    m.connect().await.unwrap();

    alpha.push_inbound(Err(ParleyError::Malformed("garbage".into())));
    alpha.push_inbound(Ok(envelope("agent_a", "agent_b", "after", None)));

    let env = m.recv_timeout(WAIT).await.expect("valid envelope still arrives");
    assert_eq!(&env.payload[..], b"after");
    assert_eq!(m.metrics().decode_errors.get(&[("connection", "alpha")]), 1);
    assert_eq!(m.metrics().envelopes_in.get(&[("connection", "alpha")]), 1);
    assert!(m.try_recv().is_none());
    m.disconnect().await.unwrap();
}

#[tokio::test]
async fn inbound_from_all_connections_is_merged() {
    let alpha = Arc::new(MockConnection::new("alpha"));
    let beta = Arc::new(MockConnection::new("beta"));
    let m = mux(MultiplexerConfig::default(), &[alpha.clone(), beta.clone()]);
    m.connect().await.unwrap();

    alpha.push_inbound(Ok(envelope("agent_a", "x", "from-alpha", None)));
    beta.push_inbound(Ok(envelope("agent_a", "y", "from-beta", None)));

    let mut senders = vec![
        m.recv_timeout(WAIT).await.unwrap().sender,
        m.recv_timeout(WAIT).await.unwrap().sender,
    ];
    senders.sort();
    assert_eq!(senders, vec!["x".to_string(), "y".to_string()]);
    m.disconnect().await.unwrap();
}

#[tokio::test]
async fn no_route_is_a_routing_error() {
    let alpha = Arc::new(MockConnection::new("alpha"));
    let m = mux(MultiplexerConfig::default(), &[alpha.clone()]);
    m.connect().await.unwrap();

    let err = m
        .put(envelope("agent_b", "agent_a", "x", None))
        .await
        .expect_err("no hint, no protocol route, no default");
    assert_eq!(err.kind().as_str(), "ROUTING");
    assert_eq!(m.metrics().routing_failures.get(&[("reason", "no_route")]), 1);

    let err = m
        .put(envelope("agent_b", "agent_a", "x", Some("gamma")))
        .await
        .expect_err("hint names an unknown connection");
    assert_eq!(err.kind().as_str(), "ROUTING");
    assert_eq!(
        m.metrics().routing_failures.get(&[("reason", "unknown_connection")]),
        1
    );
    m.disconnect().await.unwrap();
}

#[tokio::test]
async fn protocol_route_beats_default() {
    let alpha = Arc::new(MockConnection::new("alpha"));
    let beta = Arc::new(MockConnection::new("beta"));
    let routing = RoutingTable::new()
        .route(FIPA.parse().unwrap(), "beta")
        .with_default("alpha");
    let m = Multiplexer::builder(MultiplexerConfig::default())
        .connection(alpha.clone())
        .connection(beta.clone())
        .routing(routing)
        .build()
        .unwrap();
    m.connect().await.unwrap();

    m.send(envelope("agent_b", "agent_a", "x", None)).await.unwrap();
    assert_eq!(beta.sent().len(), 1);
    assert!(alpha.sent().is_empty());
    m.disconnect().await.unwrap();
}

#[tokio::test]
async fn put_before_connect_is_refused() {
    let alpha = Arc::new(MockConnection::new("alpha"));
    let m = mux(config_with_default("alpha"), &[alpha]);
    let err = m
        .put(envelope("agent_b", "agent_a", "x", None))
        .await
        .expect_err("not connected yet");
    assert_eq!(err.kind().as_str(), "NOT_CONNECTED");
}

#[tokio::test]
async fn transport_failure_surfaces_through_send() {
    let alpha = Arc::new(MockConnection::new("alpha"));
    let m = mux(config_with_default("alpha"), &[alpha.clone()]);
    m.connect().await.unwrap();
    alpha.fail_send.store(true, Ordering::SeqCst);

    let err = m
        .send(envelope("agent_b", "agent_a", "x", None))
        .await
        .expect_err("write fails");
    assert_eq!(err.kind().as_str(), "CONNECTION");
    assert_eq!(
        m.metrics()
            .send_errors
            .get(&[("connection", "alpha"), ("code", "CONNECTION")]),
        1
    );

    // the dispatcher survives a failed send
    alpha.fail_send.store(false, Ordering::SeqCst);
    m.send(envelope("agent_b", "agent_a", "y", None)).await.unwrap();
    m.disconnect().await.unwrap();
}

#[tokio::test]
async fn filter_rejection_is_a_routing_error() {
    let filter = ProtocolFilter::compile(&[], &["fetchai/fipa:*".to_string()]).unwrap();
    let alpha = Arc::new(MockConnection::new("alpha").with_filter(filter));
    let m = mux(config_with_default("alpha"), &[alpha.clone()]);
    m.connect().await.unwrap();

    let err = m
        .put(envelope("agent_b", "agent_a", "x", None))
        .await
        .expect_err("fipa is excluded on alpha");
    assert_eq!(err.kind().as_str(), "ROUTING");
    assert_eq!(m.metrics().routing_failures.get(&[("reason", "filtered")]), 1);
    assert!(alpha.sent().is_empty());
    m.disconnect().await.unwrap();
}

#[tokio::test]
async fn disconnect_is_idempotent_and_allows_reconnect() {
    let alpha = Arc::new(MockConnection::new("alpha"));
    let m = mux(config_with_default("alpha"), &[alpha.clone()]);

    m.disconnect().await.unwrap();
    m.connect().await.unwrap();
    m.disconnect().await.unwrap();
    m.disconnect().await.unwrap();
    assert!(!m.is_connected());
    assert_eq!(alpha.state(), ConnectionState::Disconnected);
    assert_eq!(m.metrics().connection_up.get(&[("connection", "alpha")]), 0);

    m.connect().await.unwrap();
    m.send(envelope("agent_b", "agent_a", "again", None)).await.unwrap();
    assert_eq!(alpha.sent().len(), 1);
    m.disconnect().await.unwrap();
}

#[tokio::test]
async fn disconnect_is_bounded_by_shutdown_timeout() {
    let stuck = Arc::new(MockConnection::hanging_on_disconnect("stuck"));
    let cfg = MultiplexerConfig {
        shutdown_timeout_ms: 200,
        ..MultiplexerConfig::default()
    };
    let m = mux(cfg, &[stuck]);
    m.connect().await.unwrap();

    tokio::time::timeout(WAIT, m.disconnect())
        .await
        .expect("disconnect must not hang")
        .unwrap();
    assert!(!m.is_connected());
}

#[tokio::test]
async fn disconnect_releases_senders_behind_a_stuck_transport() {
    let slow = Arc::new(MockConnection::hanging_on_send("slow"));
    let cfg = MultiplexerConfig {
        outbox_capacity: 1,
        shutdown_timeout_ms: 200,
        ..config_with_default("slow")
    };
    let m = mux(cfg, &[slow.clone()]);
    m.connect().await.unwrap();

    let in_flight = tokio::spawn({
        let m = m.clone();
        async move { m.send(envelope("agent_b", "agent_a", "1", None)).await }
    });
    eventually(|| slow.send_calls.load(Ordering::SeqCst) == 1).await;

    // "2" fills the outbox, "3" waits for room in it
    let mut waiting = Vec::new();
    for payload in ["2", "3"] {
        let m = m.clone();
        waiting.push(tokio::spawn(async move {
            m.send(envelope("agent_b", "agent_a", payload, None)).await
        }));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!in_flight.is_finished());
    assert!(waiting.iter().all(|h| !h.is_finished()));

    tokio::time::timeout(WAIT, m.disconnect())
        .await
        .expect("disconnect must not hang")
        .unwrap();

    for handle in std::iter::once(in_flight).chain(waiting) {
        let res = tokio::time::timeout(WAIT, handle)
            .await
            .expect("send must resolve once disconnected")
            .unwrap();
        assert_eq!(res.unwrap_err().kind().as_str(), "CONNECTION");
    }
    assert!(slow.sent().is_empty());
    assert_eq!(slow.send_calls.load(Ordering::SeqCst), 1);

    // nothing from the old session leaks into the next one
    m.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(slow.send_calls.load(Ordering::SeqCst), 1);
    m.disconnect().await.unwrap();
}

#[tokio::test]
async fn ended_receive_marks_connection_down() {
    let alpha = Arc::new(MockConnection::new("alpha"));
    let beta = Arc::new(MockConnection::new("beta"));
    let m = mux(MultiplexerConfig::default(), &[alpha.clone(), beta]);
    m.connect().await.unwrap();
    let metrics = m.metrics();
    assert_eq!(metrics.connection_up.get(&[("connection", "alpha")]), 1);

    alpha.finish_inbound();
    eventually(|| metrics.connection_up.get(&[("connection", "alpha")]) == 0).await;
    assert_eq!(metrics.connection_up.get(&[("connection", "beta")]), 1);
    m.disconnect().await.unwrap();
}

#[tokio::test]
async fn build_rejects_duplicate_and_dangling_ids() {
    let err = Multiplexer::builder(MultiplexerConfig::default())
        .connection(Arc::new(MockConnection::new("alpha")))
        .connection(Arc::new(MockConnection::new("alpha")))
        .build()
        .err()
        .expect("duplicate id");
    assert_eq!(err.kind().as_str(), "CONFIG");

    let err = Multiplexer::builder(config_with_default("beta"))
        .connection(Arc::new(MockConnection::new("alpha")))
        .build()
        .err()
        .expect("default refers to a missing connection");
    assert_eq!(err.kind().as_str(), "CONFIG");
}

#[tokio::test]
async fn fipa_negotiation_over_local_node() {
    let node = LocalNode::new();
    let buyer_mux = Multiplexer::builder(config_with_default("local"))
        .connection(Arc::new(LocalConnection::new("local", "buyer", node.clone())))
        .build()
        .unwrap();
    let seller_mux = Multiplexer::builder(config_with_default("local"))
        .connection(Arc::new(LocalConnection::new("local", "seller", node.clone())))
        .build()
        .unwrap();
    buyer_mux.connect().await.unwrap();
    seller_mux.connect().await.unwrap();

    let buyer = FipaDialogues::new("buyer");
    let seller = FipaDialogues::new("seller");

    let (cfp, b) = buyer.create("seller", FipaBody::Cfp { query: Query::default() }).unwrap();
    buyer_mux.put_message(&cfp, None).await.unwrap();

    let env = seller_mux.recv_timeout(WAIT).await.expect("cfp arrives");
    let cfp_in = env.open::<Fipa>().unwrap();
    let s = seller.update(&cfp_in).unwrap();
    let proposal = s
        .reply(
            &cfp_in,
            FipaBody::Propose {
                proposal: Description::new().with("price", 10i64),
            },
        )
        .unwrap();
    seller_mux
        .put_message(&proposal, Some(EnvelopeContext::via("local")))
        .await
        .unwrap();

    let env = buyer_mux.recv_timeout(WAIT).await.expect("proposal arrives");
    let proposal_in = env.open::<Fipa>().unwrap();
    assert!(buyer.update(&proposal_in).unwrap().ptr_eq(&b));
    let decline = b.reply(&proposal_in, FipaBody::Decline).unwrap();
    buyer_mux.put_message(&decline, None).await.unwrap();

    let env = seller_mux.recv_timeout(WAIT).await.expect("decline arrives");
    let decline_in = env.open::<Fipa>().unwrap();
    seller.update(&decline_in).unwrap();

    assert_eq!(b.end_state().unwrap(), Some(FipaEndState::DeclinedPropose));
    assert_eq!(s.end_state().unwrap(), Some(FipaEndState::DeclinedPropose));
    assert_eq!(seller.stats().other_initiated(FipaEndState::DeclinedPropose), 1);
    assert_eq!(buyer.stats().self_initiated(FipaEndState::DeclinedPropose), 1);

    buyer_mux.disconnect().await.unwrap();
    seller_mux.disconnect().await.unwrap();
    assert!(!node.is_registered("buyer"));
    assert!(!node.is_registered("seller"));
}
