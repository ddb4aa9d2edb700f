#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Edge-case tests for the wire codec and the relay state machines
//! Tests boundary conditions, malformed input, and limits

use bytes::BytesMut;
use chat_relay::core::codec::EnvelopeCodec;
use chat_relay::core::envelope::{parse, Envelope, Frame, Status};
use chat_relay::error::ProtocolError;
use chat_relay::protocol::pairing::{IncomingRequest, PairingRequest, PairingState};
use chat_relay::session::Quota;
use tokio_util::codec::{Decoder, Encoder};

// ============================================================================
// CODEC EDGE CASES
// ============================================================================

#[test]
fn test_empty_line_is_an_empty_envelope() {
    let envelope = Envelope::decode("").expect("empty line should parse");
    assert_eq!(envelope, Envelope::default());
    assert!(Frame::try_from(envelope).is_err());
}

#[test]
fn test_duplicate_key_last_wins() {
    let fields = parse("from:alice|from:bob").unwrap();
    assert_eq!(fields.get("from").map(String::as_str), Some("bob"));
}

#[test]
fn test_keys_and_values_are_not_trimmed() {
    let fields = parse(" from : alice ").unwrap();
    assert_eq!(fields.get(" from ").map(String::as_str), Some(" alice "));
    assert!(fields.get("from").is_none());
}

#[test]
fn test_unknown_request_kind_is_malformed() {
    let result = Envelope::decode("req:subscribe|from:alice");
    assert!(matches!(result, Err(ProtocolError::MalformedEnvelope(_))));
}

#[test]
fn test_bad_line_does_not_poison_the_stream() {
    let mut codec = EnvelopeCodec::new();
    let mut buf = BytesMut::from("no separator here\nfrom:alice|msg:hi\n");

    let first = codec.decode(&mut buf).unwrap().expect("first line");
    assert!(matches!(first, Err(ProtocolError::MalformedEnvelope(_))));

    let second = codec.decode(&mut buf).unwrap().expect("second line");
    assert_eq!(second.unwrap(), Envelope::chat("alice", None, "hi"));
}

#[test]
fn test_crlf_terminated_lines_decode() {
    let mut codec = EnvelopeCodec::new();
    let mut buf = BytesMut::from("req:handshake|from:alice\r\n");
    let envelope = codec.decode(&mut buf).unwrap().unwrap().unwrap();
    assert_eq!(envelope, Envelope::handshake_request("alice"));
}

#[test]
fn test_partial_line_waits_for_more_bytes() {
    let mut codec = EnvelopeCodec::new();
    let mut buf = BytesMut::from("req:handshake|fr");
    assert!(codec.decode(&mut buf).unwrap().is_none());

    buf.extend_from_slice(b"om:alice\n");
    assert!(codec.decode(&mut buf).unwrap().is_some());
}

#[test]
fn test_oversized_line_is_a_stream_error() {
    let mut codec = EnvelopeCodec::with_max_length(64);
    let mut buf = BytesMut::from(format!("msg:{}\n", "x".repeat(100)).as_str());
    match codec.decode(&mut buf) {
        Err(ProtocolError::OversizedEnvelope(64)) => {}
        other => panic!("Unexpected result: {other:?}"),
    }
}

#[test]
fn test_unterminated_last_line_decodes_at_eof() {
    let mut codec = EnvelopeCodec::new();
    let mut buf = BytesMut::from("from:alice|msg:bye");
    let last = codec.decode_eof(&mut buf).unwrap().expect("last line");
    assert_eq!(last.unwrap(), Envelope::chat("alice", None, "bye"));
}

#[test]
fn test_encode_failed_handshake_for_anonymous() {
    let mut codec = EnvelopeCodec::new();
    let mut buf = BytesMut::new();
    codec
        .encode(Envelope::handshake_ack("anonymous", Status::Failed), &mut buf)
        .unwrap();
    assert_eq!(&buf[..], b"id:anonymous|req:handshake|stat:failed\n");
}

// ============================================================================
// STATE MACHINE EDGE CASES
// ============================================================================

#[test]
fn test_new_request_replaces_pending_one() {
    let mut state = PairingState::default();
    state.begin_request("bob");
    assert_eq!(state.begin_request("carol"), PairingRequest::Pending);
    assert_eq!(state.counterpart(), Some("carol"));
    assert!(state.resolve("bob", Status::Success).is_err());
}

#[test]
fn test_receiver_cannot_confirm_twice() {
    let mut state = PairingState::default();
    assert_eq!(state.receive_request("alice"), IncomingRequest::Accept);
    state.confirm("alice").unwrap();
    assert!(matches!(
        state.confirm("alice"),
        Err(ProtocolError::UnexpectedMessage(_))
    ));
}

#[test]
fn test_zero_quota_refuses_first_message() {
    let quota = Quota::new(0);
    assert!(quota.is_exhausted());
    assert!(matches!(
        quota.next_sequence(),
        Err(ProtocolError::QuotaExceeded(0))
    ));
}
