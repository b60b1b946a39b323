#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{duplex, AsyncWriteExt, DuplexStream};

use common::envelope;
use parley_core::error::{ParleyError, Result};
use parley_core::protocol::wire::{decode_envelope, encode_envelope};
use parley_runtime::connection::{Connection, ConnectionState};
use parley_runtime::transport::framing::{read_frame, write_frame};
use parley_runtime::transport::{Dialer, StreamConnection};

/// Hands out one pre-built in-memory pipe.
struct DuplexDialer(Mutex<Option<DuplexStream>>);

#[async_trait]
impl Dialer for DuplexDialer {
    type Stream = DuplexStream;

    async fn dial(&self) -> Result<DuplexStream> {
        self.0
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ParleyError::Connection("pipe already used".into()))
    }

    fn peer(&self) -> String {
        "duplex".into()
    }
}

async fn connected_pair() -> (Arc<StreamConnection<DuplexDialer>>, DuplexStream) {
    let (local, remote) = duplex(4096);
    let conn = Arc::new(StreamConnection::new(
        "pipe",
        DuplexDialer(Mutex::new(Some(local))),
    ));
    conn.connect().await.unwrap();
    assert_eq!(conn.state(), ConnectionState::Connected);
    (conn, remote)
}

#[tokio::test]
async fn send_writes_one_framed_record() {
    let (conn, mut remote) = connected_pair().await;
    let env = envelope("agent_b", "agent_a", "payload", None);
    conn.send(env.clone()).await.unwrap();

    let frame = read_frame(&mut remote, 1024).await.unwrap().expect("one frame");
    let got = decode_envelope(frame).unwrap();
    assert_eq!(got.to, "agent_b");
    assert_eq!(got.sender, "agent_a");
    assert_eq!(got.payload, env.payload);
    conn.disconnect().await.unwrap();
}

#[tokio::test]
async fn receive_reports_bad_records_and_keeps_going() {
    let (conn, mut remote) = connected_pair().await;

    write_frame(&mut remote, b"not an envelope").await.unwrap();
    let record = encode_envelope(&envelope("agent_a", "agent_b", "ok", None)).unwrap();
    write_frame(&mut remote, &record).await.unwrap();

    let first = conn.receive().await.expect("stream still open");
    assert_eq!(first.expect_err("garbage record").kind().as_str(), "MALFORMED");
    let second = conn.receive().await.expect("stream still open").unwrap();
    assert_eq!(&second.payload[..], b"ok");

    drop(remote);
    assert!(conn.receive().await.is_none());
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn oversized_frame_closes_the_connection() {
    let (local, mut remote) = duplex(4096);
    let conn = StreamConnection::new("pipe", DuplexDialer(Mutex::new(Some(local))))
        .with_max_frame_bytes(64);
    conn.connect().await.unwrap();

    remote.write_u32_le(1000).await.unwrap();
    assert!(conn.receive().await.is_none());
    assert!(!conn.is_connected());
}

#[tokio::test]
async fn send_refuses_records_over_the_frame_limit() {
    let (local, _remote) = duplex(4096);
    let conn = StreamConnection::new("pipe", DuplexDialer(Mutex::new(Some(local))))
        .with_max_frame_bytes(64);
    conn.connect().await.unwrap();

    let big = "x".repeat(200);
    let err = conn
        .send(envelope("agent_b", "agent_a", &big, None))
        .await
        .expect_err("record exceeds limit");
    assert_eq!(err.kind().as_str(), "CONNECTION");
    assert!(conn.is_connected());
}

#[tokio::test]
async fn disconnect_unblocks_a_pending_receive() {
    let (conn, _remote) = connected_pair().await;
    let reader = Arc::clone(&conn);
    let pending = tokio::spawn(async move { reader.receive().await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    conn.disconnect().await.unwrap();

    let res = tokio::time::timeout(Duration::from_secs(2), pending)
        .await
        .expect("receive returned")
        .unwrap();
    assert!(res.is_none());
    assert_eq!(conn.state(), ConnectionState::Disconnected);

    let err = conn
        .send(envelope("agent_b", "agent_a", "late", None))
        .await
        .expect_err("closed");
    assert_eq!(err.kind().as_str(), "NOT_CONNECTED");
}

#[tokio::test]
async fn failed_dial_leaves_connection_disconnected() {
    let conn = StreamConnection::new("pipe", DuplexDialer(Mutex::new(None)));
    let err = conn.connect().await.expect_err("nothing to dial");
    assert_eq!(err.kind().as_str(), "CONNECTION");
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    conn.disconnect().await.unwrap();
}
