//! Frame construction across STOMP versions and broker dialects.
//!
//! These tests verify:
//! - version-sensitive ACK/NACK headers
//! - dialect selection from the `server` banner
//! - dialect-specific SUBSCRIBE/UNSUBSCRIBE/NACK headers
//! - argument errors raised before any frame exists

use stomp_engine::{AckMode, Dialect, Frame, Protocol, ProtocolError, Version};

fn protocol(version: Version, server: Option<&str>) -> Protocol {
    Protocol::new(None, version, server.map(str::to_string))
}

fn message() -> Frame {
    Frame::new("MESSAGE")
        .header("message-id", "m-1")
        .header("subscription", "sub-1")
        .header("destination", "/queue/a")
}

// ============================================================================
// ACK / NACK per version
// ============================================================================

#[test]
fn ack_on_1_2_uses_ack_header() {
    let msg = message().header("ack", "a-9");
    let ack = protocol(Version::V1_2, None).ack_frame(&msg, None).unwrap();
    assert_eq!(ack.command, "ACK");
    assert_eq!(ack.get_header("id"), Some("a-9"));
    assert!(!ack.has_header("message-id"));
    assert!(!ack.has_header("subscription"));
}

#[test]
fn ack_on_1_2_falls_back_to_message_id() {
    let ack = protocol(Version::V1_2, None).ack_frame(&message(), None).unwrap();
    assert_eq!(ack.get_header("id"), Some("m-1"));
}

#[test]
fn ack_on_1_1_carries_subscription() {
    let ack = protocol(Version::V1_1, None).ack_frame(&message(), None).unwrap();
    assert_eq!(ack.get_header("message-id"), Some("m-1"));
    assert_eq!(ack.get_header("subscription"), Some("sub-1"));
    assert!(!ack.has_header("id"));
}

#[test]
fn ack_on_1_0_has_message_id_only() {
    let ack = protocol(Version::V1_0, None)
        .ack_frame(&message(), Some("tx-1"))
        .unwrap();
    assert_eq!(ack.get_header("message-id"), Some("m-1"));
    assert_eq!(ack.get_header("transaction"), Some("tx-1"));
    assert!(!ack.has_header("subscription"));
    assert!(ack.legacy_mode);
}

#[test]
fn ack_without_any_id_is_rejected() {
    let err = protocol(Version::V1_2, None)
        .ack_frame(&Frame::new("MESSAGE"), None)
        .unwrap_err();
    assert_eq!(err, ProtocolError::MissingMessageId);
    assert!(!err.is_programming_error());
}

#[test]
fn nack_is_unavailable_on_1_0() {
    let err = protocol(Version::V1_0, None)
        .nack_frame(&message(), None, None)
        .unwrap_err();
    assert_eq!(err, ProtocolError::NackUnsupported(Version::V1_0));
}

#[test]
fn nack_on_1_1_mirrors_ack_headers() {
    let nack = protocol(Version::V1_1, None)
        .nack_frame(&message(), None, None)
        .unwrap();
    assert_eq!(nack.command, "NACK");
    assert_eq!(nack.get_header("message-id"), Some("m-1"));
    assert_eq!(nack.get_header("subscription"), Some("sub-1"));
    assert!(!nack.has_header("requeue"));
}

// ============================================================================
// Dialect selection
// ============================================================================

#[test]
fn dialect_follows_server_banner() {
    assert_eq!(
        protocol(Version::V1_2, Some("ActiveMQ/5.18.3")).dialect(),
        Dialect::ActiveMq
    );
    assert_eq!(
        protocol(Version::V1_2, Some("RabbitMQ/3.12.0")).dialect(),
        Dialect::RabbitMq
    );
    assert_eq!(protocol(Version::V1_2, None).dialect(), Dialect::Generic);
    assert_eq!(Dialect::OpenMq.to_string(), "OpenMQ");
}

// ============================================================================
// Dialect headers
// ============================================================================

#[test]
fn rabbitmq_nack_requeue() {
    let p = protocol(Version::V1_2, Some("RabbitMQ/3.12.0"));
    let nack = p.nack_frame(&message(), None, Some(false)).unwrap();
    assert_eq!(nack.get_header("requeue"), Some("false"));
    let nack = p.nack_frame(&message(), None, Some(true)).unwrap();
    assert_eq!(nack.get_header("requeue"), Some("true"));
}

#[test]
fn requeue_elsewhere_is_a_programming_error() {
    for server in [None, Some("ActiveMQ/5.18"), Some("apache-apollo/1.7")] {
        let err = protocol(Version::V1_2, server)
            .nack_frame(&message(), None, Some(true))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::RequeueNotSupported(_)));
        assert!(err.is_programming_error());
    }
}

#[test]
fn activemq_subscribe_sets_prefetch() {
    let p = protocol(Version::V1_2, Some("ActiveMQ/5.18.3"));
    let frame = p
        .subscribe_frame("/queue/a", Some("s-1"), AckMode::Client, None, false)
        .unwrap();
    assert_eq!(frame.get_header("activemq.prefetchSize"), Some("1"));
    assert!(!frame.has_header("activemq.subscriptionName"));

    let frame = p
        .clone()
        .with_prefetch(50)
        .subscribe_frame("/queue/a", Some("s-1"), AckMode::Client, None, false)
        .unwrap();
    assert_eq!(frame.get_header("activemq.prefetchSize"), Some("50"));
}

#[test]
fn activemq_durable_needs_client_id() {
    let err = protocol(Version::V1_2, Some("ActiveMQ/5.18.3"))
        .subscribe_frame("/topic/t", Some("s-1"), AckMode::Auto, None, true)
        .unwrap_err();
    assert_eq!(err, ProtocolError::DurableRequiresClientId);
    assert!(err.is_programming_error());
}

#[test]
fn activemq_durable_names_subscription() {
    let p = Protocol::new(
        Some("client-a".to_string()),
        Version::V1_2,
        Some("ActiveMQ/5.18.3".to_string()),
    );
    let frame = p
        .subscribe_frame("/topic/t", Some("s-1"), AckMode::Auto, None, true)
        .unwrap();
    assert_eq!(frame.get_header("activemq.subscriptionName"), Some("s-1"));
    assert_eq!(frame.get_header("durable-subscriber-name"), Some("s-1"));

    let frame = p.unsubscribe_frame("/topic/t", None, true).unwrap();
    assert_eq!(frame.get_header("activemq.subscriptionName"), Some("/topic/t"));
}

#[test]
fn rabbitmq_and_apollo_durable_are_persistent() {
    let rabbit = protocol(Version::V1_2, Some("RabbitMQ/3.12.0"));
    let frame = rabbit
        .subscribe_frame("/queue/a", Some("s-1"), AckMode::Client, None, true)
        .unwrap();
    assert_eq!(frame.get_header("persistent"), Some("true"));
    assert_eq!(frame.get_header("prefetch-count"), Some("1"));

    let apollo = protocol(Version::V1_2, Some("apache-apollo/1.7.1"));
    let frame = apollo
        .subscribe_frame("/queue/a", Some("s-1"), AckMode::Client, None, true)
        .unwrap();
    assert_eq!(frame.get_header("persistent"), Some("true"));
    let frame = apollo.unsubscribe_frame("/queue/a", Some("s-1"), true).unwrap();
    assert_eq!(frame.get_header("persistent"), Some("true"));
}

#[test]
fn generic_dialect_ignores_durable() {
    let frame = protocol(Version::V1_2, None)
        .subscribe_frame("/queue/a", Some("s-1"), AckMode::Client, Some("x = 1"), true)
        .unwrap();
    assert_eq!(frame.get_header("selector"), Some("x = 1"));
    assert!(!frame.has_header("persistent"));
    assert!(!frame.has_header("activemq.subscriptionName"));
}

#[test]
fn openmq_acks_carry_subscription_on_1_0() {
    let ack = protocol(Version::V1_0, Some("Open Message Queue/5.1"))
        .ack_frame(&message(), None)
        .unwrap();
    assert_eq!(ack.get_header("message-id"), Some("m-1"));
    assert_eq!(ack.get_header("subscription"), Some("sub-1"));
}

// ============================================================================
// SUBSCRIBE validation
// ============================================================================

#[test]
fn client_individual_requires_1_1() {
    let err = protocol(Version::V1_0, None)
        .subscribe_frame("/queue/a", None, AckMode::ClientIndividual, None, false)
        .unwrap_err();
    assert_eq!(
        err,
        ProtocolError::UnsupportedAckMode {
            mode: AckMode::ClientIndividual,
            version: Version::V1_0,
        }
    );

    let frame = protocol(Version::V1_1, None)
        .subscribe_frame("/queue/a", None, AckMode::ClientIndividual, None, false)
        .unwrap();
    assert_eq!(frame.get_header("ack"), Some("client-individual"));
    assert!(!frame.has_header("id"));
}

#[test]
fn disconnect_carries_client_id() {
    let p = Protocol::new(Some("c-1".to_string()), Version::V1_2, None);
    assert_eq!(p.disconnect_frame().get_header("client-id"), Some("c-1"));
    assert!(!protocol(Version::V1_2, None)
        .disconnect_frame()
        .has_header("client-id"));
}
