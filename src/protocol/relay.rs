//! Message relay between paired participants.
//!
//! Each relayed message is tagged with the sender's sequence number as
//! `[<n>] <text>`. The sequence only advances once the message has been handed
//! to the peer's session queue, so a refused relay never burns quota.

use tracing::{debug, warn};

use crate::core::envelope::Envelope;
use crate::error::{ProtocolError, Result};
use crate::session::participant::{ParticipantSession, SessionCommand};
use crate::session::registry::Registry;
use crate::utils::metrics::global_metrics;

/// Prefix `text` with its sequence number
pub fn tag(sequence: u32, text: &str) -> String {
    format!("[{}] {}", sequence, text)
}

/// Split a tagged message into its sequence number and text
pub fn split_tag(tagged: &str) -> Option<(u32, &str)> {
    let rest = tagged.strip_prefix('[')?;
    let (number, text) = rest.split_once("] ")?;
    let sequence = number.parse().ok()?;
    Some((sequence, text))
}

/// Forward `text` from `session` to its peer.
///
/// Returns the sequence number the message was tagged with.
pub async fn relay(
    session: &mut ParticipantSession,
    registry: &Registry,
    text: &str,
) -> Result<u32> {
    let metrics = global_metrics();

    let outcome = hand_off(session, registry, text).await;
    match &outcome {
        Ok(sequence) => {
            session.quota_mut().advance();
            metrics.message_relayed();
            debug!(
                identifier = session.identifier(),
                sequence = *sequence,
                "Message relayed"
            );
        }
        Err(e) => {
            metrics.relay_refused(e);
            warn!(identifier = session.identifier(), error = %e, "Relay refused");
        }
    }
    outcome
}

async fn hand_off(session: &ParticipantSession, registry: &Registry, text: &str) -> Result<u32> {
    let peer = session.peer().ok_or(ProtocolError::NoPeer)?;
    let sequence = session.quota().next_sequence()?;

    let handle = registry
        .lookup(peer)
        .await
        .ok_or_else(|| ProtocolError::PeerUnreachable(peer.to_string()))?;
    handle.push(SessionCommand::Deliver {
        from: session.identifier().to_string(),
        message: tag(sequence, text),
    })?;

    Ok(sequence)
}

/// Turn a relayed message into the envelope written to the receiving client.
///
/// Messages from anyone but the current peer are dropped.
pub fn deliver(session: &ParticipantSession, from: &str, message: String) -> Option<Envelope> {
    if session.peer() != Some(from) {
        warn!(
            identifier = session.identifier(),
            from, "Dropping message from participant that is not the peer"
        );
        return None;
    }
    Some(Envelope::chat(from, None, message))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::session::participant::SessionHandle;
    use tokio::sync::mpsc;

    #[test]
    fn test_tag_round_trip() {
        let tagged = tag(3, "see you | later");
        assert_eq!(tagged, "[3] see you | later");
        assert_eq!(split_tag(&tagged), Some((3, "see you | later")));
    }

    #[test]
    fn test_split_tag_rejects_untagged() {
        assert_eq!(split_tag("hello"), None);
        assert_eq!(split_tag("[x] hello"), None);
        assert_eq!(split_tag("[4]hello"), None);
        assert_eq!(split_tag("[7] "), Some((7, "")));
    }

    fn paired(identifier: &str, peer: &str, quota: u32) -> ParticipantSession {
        let mut session = ParticipantSession::new(identifier, quota);
        session.pairing_mut().receive_request(peer);
        session.pairing_mut().confirm(peer).unwrap();
        session
    }

    #[tokio::test]
    async fn test_unpaired_session_has_no_peer() {
        let registry = Registry::new(10);
        let mut session = ParticipantSession::new("alice", 10);
        assert!(matches!(
            relay(&mut session, &registry, "hi").await,
            Err(ProtocolError::NoPeer)
        ));
    }

    #[tokio::test]
    async fn test_relay_enqueues_tagged_message() {
        let registry = Registry::new(10);
        let (tx, mut rx) = mpsc::channel(4);
        registry.register(SessionHandle::new("bob", tx)).await.unwrap();

        let mut alice = paired("alice", "bob", 10);
        assert_eq!(relay(&mut alice, &registry, "hi").await.unwrap(), 1);
        assert_eq!(relay(&mut alice, &registry, "again").await.unwrap(), 2);

        assert_eq!(
            rx.recv().await.unwrap(),
            SessionCommand::Deliver {
                from: "alice".into(),
                message: "[1] hi".into()
            }
        );
        assert_eq!(alice.quota().sent(), 2);
    }

    #[tokio::test]
    async fn test_quota_exhaustion() {
        let registry = Registry::new(10);
        let (tx, _rx) = mpsc::channel(8);
        registry.register(SessionHandle::new("bob", tx)).await.unwrap();

        let mut alice = paired("alice", "bob", 2);
        relay(&mut alice, &registry, "one").await.unwrap();
        relay(&mut alice, &registry, "two").await.unwrap();
        assert!(matches!(
            relay(&mut alice, &registry, "three").await,
            Err(ProtocolError::QuotaExceeded(2))
        ));
        assert_eq!(alice.quota().sent(), 2);
    }

    #[tokio::test]
    async fn test_gone_peer_does_not_consume_quota() {
        let registry = Registry::new(10);
        let (tx, rx) = mpsc::channel(4);
        registry.register(SessionHandle::new("bob", tx)).await.unwrap();
        drop(rx);

        let mut alice = paired("alice", "bob", 10);
        assert!(matches!(
            relay(&mut alice, &registry, "hi").await,
            Err(ProtocolError::PeerUnreachable(id)) if id == "bob"
        ));
        assert_eq!(alice.quota().sent(), 0);
        assert_eq!(alice.peer(), Some("bob"));
    }

    #[test]
    fn test_deliver_only_from_peer() {
        let bob = paired("bob", "alice", 10);
        assert!(deliver(&bob, "mallory", "[1] hi".into()).is_none());
        let env = deliver(&bob, "alice", "[1] hi".into()).unwrap();
        assert_eq!(env.encode(), "from:alice|msg:[1] hi");
    }
}
