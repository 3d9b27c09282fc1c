//! Tests for transaction frames: construction, encoding and the session
//! transaction lifecycle.

mod common;

use bytes::BytesMut;
use common::{ScriptedTransport, connected};
use std::time::Duration;
use stomp_engine::{
    AckMode, ConnError, ConnectOptions, Connection, Frame, ManualClock, Protocol, Session,
    SessionState, StateError, StompCodec, StompItem, Version,
};
use tokio_util::codec::{Decoder, Encoder};

/// Helper function to verify a frame has the expected command and transaction header
fn verify_transaction_frame(frame: &Frame, expected_command: &str, expected_tx_id: &str) {
    assert_eq!(frame.command, expected_command);
    assert_eq!(frame.get_header("transaction"), Some(expected_tx_id));
}

fn encode_decode(frame: Frame) -> Frame {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::new();
    codec
        .encode(StompItem::Frame(frame), &mut buf)
        .expect("encode failed");
    match codec.decode(&mut buf).expect("decode failed") {
        Some(StompItem::Frame(f)) => f,
        other => panic!("expected frame, got {:?}", other),
    }
}

fn session() -> Session<ScriptedTransport> {
    let transport = ScriptedTransport::new().with_reply(&connected("1.2", &[]));
    let conn = Connection::new(transport)
        .with_clock(ManualClock::new().with_step(Duration::from_millis(10)));
    let mut session = Session::open(conn, &ConnectOptions::new()).expect("connect");
    session.connection_mut().transport_mut().written.clear();
    session
}

fn written_frames(session: &Session<ScriptedTransport>) -> Vec<Frame> {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&session.connection().transport().written[..]);
    let mut frames = Vec::new();
    while let Some(item) = codec.decode(&mut buf).unwrap() {
        if let StompItem::Frame(f) = item {
            frames.push(f);
        }
    }
    frames
}

// ============================================================================
// Protocol builders
// ============================================================================

#[test]
fn begin_commit_abort_frames() {
    let protocol = Protocol::new(None, Version::V1_2, None);
    verify_transaction_frame(&protocol.begin_frame(Some("tx1")), "BEGIN", "tx1");
    verify_transaction_frame(&protocol.commit_frame(Some("tx2")), "COMMIT", "tx2");
    verify_transaction_frame(&protocol.abort_frame(Some("tx3")), "ABORT", "tx3");
}

#[test]
fn transaction_frames_round_trip() {
    let protocol = Protocol::new(None, Version::V1_1, None);
    for frame in [
        protocol.begin_frame(Some("tx-test")),
        protocol.commit_frame(Some("tx-test")),
        protocol.abort_frame(Some("tx-test")),
    ] {
        let cmd = frame.command.clone();
        let decoded = encode_decode(frame);
        verify_transaction_frame(&decoded, &cmd, "tx-test");
    }
}

#[test]
fn transaction_id_with_colon_survives_escaping() {
    let protocol = Protocol::new(None, Version::V1_2, None);
    let decoded = encode_decode(protocol.begin_frame(Some("tx:1")));
    verify_transaction_frame(&decoded, "BEGIN", "tx:1");
}

#[test]
fn legacy_transaction_frame_is_not_escaped() {
    let protocol = Protocol::new(None, Version::V1_0, None);
    let wire = protocol.begin_frame(Some("tx:1")).to_bytes();
    assert_eq!(&wire[..], b"BEGIN\ntransaction:tx:1\n\n\0");
}

#[test]
fn send_inside_transaction_carries_header() {
    let protocol = Protocol::new(None, Version::V1_2, None);
    let frame = protocol.send_frame(
        "/queue/a",
        Frame::new("SEND").header("transaction", "stale"),
        Some("tx-5"),
    );
    verify_transaction_frame(&frame, "SEND", "tx-5");
    assert_eq!(frame.get_header("destination"), Some("/queue/a"));
}

// ============================================================================
// Session lifecycle
// ============================================================================

#[test]
fn producer_transaction_commit() {
    let mut session = session();
    let tx = session.begin().unwrap();
    assert_eq!(session.transaction_id(), Some(tx.as_str()));
    assert!(matches!(
        session.state(),
        SessionState::ProducerTransaction { .. }
    ));

    session
        .send("/queue/a", Frame::new("SEND").set_body(b"one".to_vec()))
        .unwrap();
    session.commit().unwrap();
    assert!(matches!(session.state(), SessionState::Producer));
    assert!(session.transaction_id().is_none());

    let frames = written_frames(&session);
    let commands: Vec<&str> = frames.iter().map(|f| f.command.as_str()).collect();
    assert_eq!(commands, ["BEGIN", "SEND", "COMMIT"]);
    for frame in &frames {
        assert_eq!(frame.get_header("transaction"), Some(tx.as_str()));
    }
}

#[test]
fn abort_returns_to_producer() {
    let mut session = session();
    session.begin().unwrap();
    session.abort().unwrap();
    assert!(matches!(session.state(), SessionState::Producer));
    assert_eq!(written_frames(&session)[1].command, "ABORT");
}

#[test]
fn transaction_ids_are_never_reused() {
    let mut session = session();
    let first = session.begin().unwrap();
    session.commit().unwrap();
    let second = session.begin().unwrap();
    assert_ne!(first, second);
}

#[test]
fn nested_begin_is_illegal() {
    let mut session = session();
    session.begin().unwrap();
    let err = session.begin().unwrap_err();
    assert!(matches!(
        err,
        ConnError::State(StateError::Illegal {
            operation: "begin",
            ..
        })
    ));
}

#[test]
fn commit_without_transaction_is_illegal() {
    let mut session = session();
    assert!(matches!(
        session.commit(),
        Err(ConnError::State(StateError::Illegal { .. }))
    ));
    assert!(matches!(
        session.abort(),
        Err(ConnError::State(StateError::Illegal { .. }))
    ));
    assert!(session.connection().transport().written.is_empty());
}

#[test]
fn consumer_transaction_keeps_subscription() {
    let mut session = session();
    let sub = session.subscribe("/queue/in", AckMode::Client).unwrap();
    let tx = session.begin().unwrap();
    match session.state() {
        SessionState::ConsumerTransaction {
            transaction_id,
            subscriptions,
        } => {
            assert_eq!(transaction_id, &tx);
            assert_eq!(subscriptions[0].id, sub);
        }
        other => panic!("unexpected state {other}"),
    }
    session.commit().unwrap();
    assert_eq!(session.current_subscriptions()[0].id, sub);
}

#[test]
fn ack_inside_transaction() {
    let mut session = session();
    session.subscribe("/queue/in", AckMode::Client).unwrap();
    let tx = session.begin().unwrap();
    let mut message = Frame::new("MESSAGE")
        .header("message-id", "m-1")
        .header("ack", "a-1")
        .header("subscription", "sub-1");
    session.ack(&mut message).unwrap();

    let ack = written_frames(&session).pop().unwrap();
    assert_eq!(ack.command, "ACK");
    assert_eq!(ack.get_header("id"), Some("a-1"));
    assert_eq!(ack.get_header("transaction"), Some(tx.as_str()));
}
