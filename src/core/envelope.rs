//! # Envelope
//!
//! The flat key-value unit exchanged on the wire.
//!
//! ## Wire Format
//! ```text
//! req:msg|from:alice|to:bob
//! ```
//! Pairs are separated by `|`, keys from values by the first `:`. Neither
//! character is escaped, so content containing `|` cannot round-trip. Callers
//! are expected to keep both out of identifiers and message text.
//!
//! Parsing happens in two steps: [`parse`] turns a raw line into a [`Fields`]
//! map, [`Envelope::from_fields`] lifts that map into typed optional fields,
//! and [`Frame::try_from`] checks that the fields describe exactly one
//! protocol exchange.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{constants, ProtocolError, Result};

/// Separates `key:value` pairs.
pub const FIELD_SEPARATOR: char = '|';

/// Separates a key from its value.
pub const KEY_VALUE_SEPARATOR: char = ':';

/// Raw field mapping as read from or written to the wire.
pub type Fields = BTreeMap<String, String>;

/// Parse a raw line into its field mapping.
///
/// Empty segments are skipped, so a trailing separator is tolerated. A
/// segment without a key-value separator makes the whole line malformed.
pub fn parse(raw: &str) -> Result<Fields> {
    let mut fields = Fields::new();

    for segment in raw.split(FIELD_SEPARATOR) {
        if segment.is_empty() {
            continue;
        }

        let (key, value) = segment.split_once(KEY_VALUE_SEPARATOR).ok_or_else(|| {
            ProtocolError::MalformedEnvelope(format!(
                "{}: '{segment}'",
                constants::ERR_MISSING_SEPARATOR
            ))
        })?;

        fields.insert(key.to_string(), value.to_string());
    }

    Ok(fields)
}

/// Serialize a field mapping into a raw line (without line terminator).
pub fn serialize(fields: &Fields) -> String {
    let mut out = String::new();
    for (key, value) in fields {
        if !out.is_empty() {
            out.push(FIELD_SEPARATOR);
        }
        out.push_str(key);
        out.push(KEY_VALUE_SEPARATOR);
        out.push_str(value);
    }
    out
}

/// Known envelope keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Request,
    From,
    To,
    Status,
    Message,
    InstanceId,
}

impl Field {
    /// Wire key for this field
    pub fn key(self) -> &'static str {
        match self {
            Field::Request => "req",
            Field::From => "from",
            Field::To => "to",
            Field::Status => "stat",
            Field::Message => "msg",
            Field::InstanceId => "id",
        }
    }
}

/// Value of the `req` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Handshake,
    Message,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Handshake => "handshake",
            RequestKind::Message => "msg",
        }
    }
}

impl FromStr for RequestKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "handshake" => Ok(RequestKind::Handshake),
            "msg" => Ok(RequestKind::Message),
            other => Err(ProtocolError::MalformedEnvelope(format!(
                "{}: '{other}'",
                constants::ERR_UNKNOWN_REQUEST
            ))),
        }
    }
}

/// Value of the `stat` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    Failed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Failed => "failed",
        }
    }
}

impl FromStr for Status {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "success" => Ok(Status::Success),
            "failed" => Ok(Status::Failed),
            other => Err(ProtocolError::MalformedEnvelope(format!(
                "{}: '{other}'",
                constants::ERR_UNKNOWN_STATUS
            ))),
        }
    }
}

/// Why the relay refused to forward a chat message.
///
/// Carried in the `msg` field of a refusal as `no_peer`,
/// `quota_exceeded:<limit>` or `peer_unreachable:<peer>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RelayRefusal {
    NoPeer,
    QuotaExceeded(u32),
    PeerUnreachable(String),
}

impl RelayRefusal {
    /// The refusal matching a relay error, if the error is one
    pub fn from_error(err: &ProtocolError) -> Option<Self> {
        match err {
            ProtocolError::NoPeer => Some(RelayRefusal::NoPeer),
            ProtocolError::QuotaExceeded(limit) => Some(RelayRefusal::QuotaExceeded(*limit)),
            ProtocolError::PeerUnreachable(peer) => {
                Some(RelayRefusal::PeerUnreachable(peer.clone()))
            }
            _ => None,
        }
    }
}

impl fmt::Display for RelayRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayRefusal::NoPeer => f.write_str("no_peer"),
            RelayRefusal::QuotaExceeded(limit) => write!(f, "quota_exceeded:{}", limit),
            RelayRefusal::PeerUnreachable(peer) => write!(f, "peer_unreachable:{}", peer),
        }
    }
}

impl FromStr for RelayRefusal {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        let unknown = || {
            ProtocolError::MalformedEnvelope(format!(
                "{}: '{s}'",
                constants::ERR_UNKNOWN_REFUSAL
            ))
        };
        match s.split_once(KEY_VALUE_SEPARATOR) {
            None if s == "no_peer" => Ok(RelayRefusal::NoPeer),
            Some(("quota_exceeded", limit)) => limit
                .parse()
                .map(RelayRefusal::QuotaExceeded)
                .map_err(|_| unknown()),
            Some(("peer_unreachable", peer)) if !peer.is_empty() => {
                Ok(RelayRefusal::PeerUnreachable(peer.to_string()))
            }
            _ => Err(unknown()),
        }
    }
}

impl From<RelayRefusal> for ProtocolError {
    fn from(refusal: RelayRefusal) -> Self {
        match refusal {
            RelayRefusal::NoPeer => ProtocolError::NoPeer,
            RelayRefusal::QuotaExceeded(limit) => ProtocolError::QuotaExceeded(limit),
            RelayRefusal::PeerUnreachable(peer) => ProtocolError::PeerUnreachable(peer),
        }
    }
}

/// Typed view of an envelope. Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub request: Option<RequestKind>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub status: Option<Status>,
    pub message: Option<String>,
    pub instance_id: Option<String>,
}

/// Identifier fields treat an empty value as absent.
fn identifier(fields: &Fields, field: Field) -> Option<String> {
    fields
        .get(field.key())
        .filter(|value| !value.is_empty())
        .cloned()
}

impl Envelope {
    /// Lift a raw field mapping into typed fields. Unknown keys are ignored.
    pub fn from_fields(fields: &Fields) -> Result<Self> {
        let request = fields
            .get(Field::Request.key())
            .map(|value| value.parse::<RequestKind>())
            .transpose()?;
        let status = fields
            .get(Field::Status.key())
            .map(|value| value.parse::<Status>())
            .transpose()?;

        Ok(Self {
            request,
            from: identifier(fields, Field::From),
            to: identifier(fields, Field::To),
            status,
            message: fields.get(Field::Message.key()).cloned(),
            instance_id: identifier(fields, Field::InstanceId),
        })
    }

    /// Lower the typed fields back into a raw mapping
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        let mut put = |field: Field, value: Option<&str>| {
            if let Some(value) = value {
                fields.insert(field.key().to_string(), value.to_string());
            }
        };

        put(Field::Request, self.request.map(RequestKind::as_str));
        put(Field::From, self.from.as_deref());
        put(Field::To, self.to.as_deref());
        put(Field::Status, self.status.map(Status::as_str));
        put(Field::Message, self.message.as_deref());
        put(Field::InstanceId, self.instance_id.as_deref());
        fields
    }

    /// Parse a raw line straight into an envelope
    pub fn decode(raw: &str) -> Result<Self> {
        Self::from_fields(&parse(raw)?)
    }

    /// Serialize into a raw line
    pub fn encode(&self) -> String {
        serialize(&self.to_fields())
    }

    /// `req=handshake, from=<id>`, sent by a client to register.
    pub fn handshake_request(from: impl Into<String>) -> Self {
        Self {
            request: Some(RequestKind::Handshake),
            from: Some(from.into()),
            ..Self::default()
        }
    }

    /// `req=handshake, id=<id>, stat=<status>`, sent by the server.
    pub fn handshake_ack(instance_id: impl Into<String>, status: Status) -> Self {
        Self {
            request: Some(RequestKind::Handshake),
            instance_id: Some(instance_id.into()),
            status: Some(status),
            ..Self::default()
        }
    }

    /// `req=msg, from=<id>[, to=<target>]`
    pub fn pairing_request(from: impl Into<String>, to: Option<String>) -> Self {
        Self {
            request: Some(RequestKind::Message),
            from: Some(from.into()),
            to,
            ..Self::default()
        }
    }

    /// `req=msg, from=<id>[, to=<target>], stat=<status>`
    pub fn pairing_reply(from: impl Into<String>, to: Option<String>, status: Status) -> Self {
        Self {
            request: Some(RequestKind::Message),
            from: Some(from.into()),
            to,
            status: Some(status),
            ..Self::default()
        }
    }

    /// `from=<id>[, to=<peer>], msg=<text>`
    pub fn chat(from: impl Into<String>, to: Option<String>, message: impl Into<String>) -> Self {
        Self {
            from: Some(from.into()),
            to,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// `from=<sender>, msg=<refusal>, stat=failed`, sent by the server to a
    /// client whose chat message was not relayed.
    pub fn relay_refused(from: impl Into<String>, refusal: &RelayRefusal) -> Self {
        Self {
            from: Some(from.into()),
            message: Some(refusal.to_string()),
            status: Some(Status::Failed),
            ..Self::default()
        }
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// An envelope checked to carry exactly one protocol meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    HandshakeRequest {
        from: String,
    },
    HandshakeAck {
        instance_id: String,
        status: Status,
    },
    PairingRequest {
        from: String,
        to: Option<String>,
    },
    PairingReply {
        from: String,
        to: Option<String>,
        status: Status,
    },
    Chat {
        from: String,
        to: Option<String>,
        message: String,
    },
    RelayRefused {
        from: String,
        refusal: RelayRefusal,
    },
}

impl Frame {
    /// Short name used in logs and metrics
    pub fn opcode(&self) -> &'static str {
        match self {
            Frame::HandshakeRequest { .. } => "HS_REQUEST",
            Frame::HandshakeAck { .. } => "HS_ACK",
            Frame::PairingRequest { .. } => "PAIR_REQUEST",
            Frame::PairingReply { .. } => "PAIR_REPLY",
            Frame::Chat { .. } => "CHAT",
            Frame::RelayRefused { .. } => "RELAY_NACK",
        }
    }
}

fn mixed(present: &[(bool, Field)]) -> Result<()> {
    let extra: Vec<&str> = present
        .iter()
        .filter(|(set, _)| *set)
        .map(|(_, field)| field.key())
        .collect();

    if extra.is_empty() {
        Ok(())
    } else {
        Err(ProtocolError::MalformedEnvelope(format!(
            "{} ({})",
            constants::ERR_MIXED_CATEGORIES,
            extra.join(", ")
        )))
    }
}

fn require(value: Option<String>, what: &str) -> Result<String> {
    value.ok_or_else(|| ProtocolError::MalformedEnvelope(what.to_string()))
}

impl TryFrom<Envelope> for Frame {
    type Error = ProtocolError;

    fn try_from(env: Envelope) -> Result<Self> {
        match env.request {
            Some(RequestKind::Handshake) => match env.status {
                None => {
                    mixed(&[
                        (env.to.is_some(), Field::To),
                        (env.message.is_some(), Field::Message),
                        (env.instance_id.is_some(), Field::InstanceId),
                    ])?;
                    Ok(Frame::HandshakeRequest {
                        from: require(env.from, constants::ERR_MISSING_FROM)?,
                    })
                }
                Some(status) => {
                    mixed(&[
                        (env.to.is_some(), Field::To),
                        (env.message.is_some(), Field::Message),
                    ])?;
                    Ok(Frame::HandshakeAck {
                        instance_id: require(env.instance_id, constants::ERR_INVALID_ACK)?,
                        status,
                    })
                }
            },
            Some(RequestKind::Message) => {
                mixed(&[
                    (env.message.is_some(), Field::Message),
                    (env.instance_id.is_some(), Field::InstanceId),
                ])?;
                let from = require(env.from, constants::ERR_MISSING_FROM)?;
                Ok(match env.status {
                    None => Frame::PairingRequest { from, to: env.to },
                    Some(status) => Frame::PairingReply {
                        from,
                        to: env.to,
                        status,
                    },
                })
            }
            None if env.status == Some(Status::Failed) => {
                mixed(&[
                    (env.to.is_some(), Field::To),
                    (env.instance_id.is_some(), Field::InstanceId),
                ])?;
                let from = require(env.from, constants::ERR_MISSING_FROM)?;
                let refusal = require(env.message, constants::ERR_UNKNOWN_REFUSAL)?.parse()?;
                Ok(Frame::RelayRefused { from, refusal })
            }
            None => {
                mixed(&[
                    (env.status.is_some(), Field::Status),
                    (env.instance_id.is_some(), Field::InstanceId),
                ])?;
                let from = require(env.from, constants::ERR_MISSING_FROM)?;
                let message = require(env.message, "Envelope has no request and no message")?;
                Ok(Frame::Chat {
                    from,
                    to: env.to,
                    message,
                })
            }
        }
    }
}

impl From<Frame> for Envelope {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::HandshakeRequest { from } => Envelope::handshake_request(from),
            Frame::HandshakeAck {
                instance_id,
                status,
            } => Envelope::handshake_ack(instance_id, status),
            Frame::PairingRequest { from, to } => Envelope::pairing_request(from, to),
            Frame::PairingReply { from, to, status } => Envelope::pairing_reply(from, to, status),
            Frame::Chat { from, to, message } => Envelope::chat(from, to, message),
            Frame::RelayRefused { from, refusal } => Envelope::relay_refused(from, &refusal),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_line() {
        let fields = parse("req:handshake|from:alice").unwrap();
        assert_eq!(fields.get("req").map(String::as_str), Some("handshake"));
        assert_eq!(fields.get("from").map(String::as_str), Some("alice"));
    }

    #[test]
    fn test_parse_tolerates_trailing_separator() {
        let fields = parse("from:alice|msg:hi|").unwrap();
        assert_eq!(fields.len(), 2);
    }

    #[test]
    fn test_parse_splits_on_first_colon() {
        let fields = parse("msg:time is 10:30").unwrap();
        assert_eq!(fields.get("msg").map(String::as_str), Some("time is 10:30"));
    }

    #[test]
    fn test_parse_rejects_segment_without_separator() {
        let result = parse("req:handshake|alice");
        assert!(matches!(result, Err(ProtocolError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_serialize_is_sorted_without_trailing_separator() {
        let env = Envelope::pairing_request("alice", Some("bob".into()));
        assert_eq!(env.encode(), "from:alice|req:msg|to:bob");
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let env = Envelope::decode("from:alice|msg:hi|color:blue").unwrap();
        assert_eq!(env, Envelope::chat("alice", None, "hi"));
    }

    #[test]
    fn test_unknown_status_is_malformed() {
        let result = Envelope::decode("req:msg|from:bob|stat:blocked");
        assert!(matches!(result, Err(ProtocolError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_empty_identifier_is_absent() {
        let env = Envelope::decode("req:handshake|from:").unwrap();
        assert_eq!(env.from, None);
        assert!(Frame::try_from(env).is_err());
    }

    #[test]
    fn test_classify_each_category() {
        let cases = [
            ("req:handshake|from:alice", "HS_REQUEST"),
            ("req:handshake|id:alice|stat:success", "HS_ACK"),
            ("req:msg|from:alice|to:bob", "PAIR_REQUEST"),
            ("req:msg|from:bob|to:alice|stat:success", "PAIR_REPLY"),
            ("from:alice|to:bob|msg:hi", "CHAT"),
            ("from:alice|msg:quota_exceeded:3|stat:failed", "RELAY_NACK"),
        ];
        for (raw, opcode) in cases {
            let frame = Frame::try_from(Envelope::decode(raw).unwrap()).unwrap();
            assert_eq!(frame.opcode(), opcode, "line {raw}");
        }
    }

    #[test]
    fn test_classify_rejects_mixed_categories() {
        let cases = [
            "req:msg|from:alice|to:bob|stat:success|msg:hi",
            "req:handshake|from:alice|msg:hi",
            "from:alice|msg:hi|stat:failed",
            "req:msg|from:alice|id:alice",
        ];
        for raw in cases {
            let result = Frame::try_from(Envelope::decode(raw).unwrap());
            assert!(
                matches!(result, Err(ProtocolError::MalformedEnvelope(_))),
                "line {raw} should be malformed"
            );
        }
    }

    #[test]
    fn test_pairing_reply_requires_sender() {
        let result = Frame::try_from(Envelope::decode("req:msg|stat:failed").unwrap());
        assert!(matches!(result, Err(ProtocolError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_frame_envelope_conversion_is_lossless() {
        let frame = Frame::PairingReply {
            from: "carol".into(),
            to: None,
            status: Status::Failed,
        };
        let env = Envelope::from(frame.clone());
        assert_eq!(env.encode(), "from:carol|req:msg|stat:failed");
        assert_eq!(Frame::try_from(env).unwrap(), frame);
    }

    #[test]
    fn test_relay_refusal_wire_form() {
        let cases = [
            (RelayRefusal::NoPeer, "from:alice|msg:no_peer|stat:failed"),
            (
                RelayRefusal::QuotaExceeded(2),
                "from:alice|msg:quota_exceeded:2|stat:failed",
            ),
            (
                RelayRefusal::PeerUnreachable("bob".into()),
                "from:alice|msg:peer_unreachable:bob|stat:failed",
            ),
        ];
        for (refusal, line) in cases {
            assert_eq!(Envelope::relay_refused("alice", &refusal).encode(), line);
            let frame = Frame::try_from(Envelope::decode(line).unwrap()).unwrap();
            assert_eq!(
                frame,
                Frame::RelayRefused {
                    from: "alice".into(),
                    refusal
                }
            );
        }
    }

    #[test]
    fn test_unknown_refusal_is_malformed() {
        for raw in [
            "from:alice|msg:quota_exceeded:many|stat:failed",
            "from:alice|msg:peer_unreachable:|stat:failed",
            "from:alice|stat:failed",
            "from:alice|msg:no_peer|stat:success",
        ] {
            let result = Frame::try_from(Envelope::decode(raw).unwrap());
            assert!(
                matches!(result, Err(ProtocolError::MalformedEnvelope(_))),
                "line {raw} should be malformed"
            );
        }
    }
}
