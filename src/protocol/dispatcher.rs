use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::core::envelope::{Envelope, Frame, RelayRefusal};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::{pairing, relay};
use crate::session::participant::{ParticipantSession, SessionCommand};
use crate::session::registry::Registry;

/// What the connection worker does after a frame has been handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Keep serving, writing the envelope back to the client if there is one
    Continue(Option<Envelope>),
    /// Close the connection
    Close,
}

/// Routes a registered session's traffic to the pairing and relay operations.
///
/// One dispatcher serves one connection; the registry inside is shared.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Registry,
    session_config: SessionConfig,
}

impl Dispatcher {
    pub fn new(registry: Registry, session_config: SessionConfig) -> Self {
        Self {
            registry,
            session_config,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Handle a frame sent by the session's own client.
    ///
    /// Errors are scoped to the exchange that produced them; the connection
    /// stays open unless [`Outcome::Close`] is returned.
    pub async fn dispatch(
        &self,
        session: &mut ParticipantSession,
        frame: Frame,
    ) -> Result<Outcome> {
        debug!(
            identifier = session.identifier(),
            opcode = frame.opcode(),
            "Dispatching frame"
        );

        match frame {
            Frame::HandshakeRequest { .. } => Err(ProtocolError::UnexpectedMessage(
                constants::ERR_ALREADY_REGISTERED.to_string(),
            )),
            Frame::HandshakeAck { .. } => Err(ProtocolError::UnexpectedMessage(
                constants::ERR_INVALID_ACK.to_string(),
            )),
            Frame::PairingRequest { to, .. } => {
                let target = to.ok_or_else(|| {
                    ProtocolError::MalformedEnvelope(constants::ERR_MISSING_TO.to_string())
                })?;
                let reply = pairing::forward_request(session, &self.registry, &target).await?;
                Ok(Outcome::Continue(reply))
            }
            Frame::PairingReply { to, status, .. } => {
                let initiator = to.ok_or_else(|| {
                    ProtocolError::MalformedEnvelope(constants::ERR_MISSING_TO.to_string())
                })?;
                let reply =
                    pairing::forward_reply(session, &self.registry, &initiator, status).await?;
                Ok(Outcome::Continue(reply))
            }
            Frame::RelayRefused { .. } => Err(ProtocolError::UnexpectedMessage(
                constants::ERR_CLIENT_REFUSAL.to_string(),
            )),
            // The recipient is always the bound peer, whatever `to` says
            Frame::Chat { message, .. } => {
                match relay::relay(session, &self.registry, &message).await {
                    Ok(_) => Ok(Outcome::Continue(None)),
                    Err(ProtocolError::QuotaExceeded(limit))
                        if self.session_config.close_on_quota_exhausted =>
                    {
                        info!(
                            identifier = session.identifier(),
                            limit, "Quota exhausted, closing connection"
                        );
                        Ok(Outcome::Close)
                    }
                    Err(e) => match RelayRefusal::from_error(&e) {
                        Some(refusal) => {
                            debug!(
                                identifier = session.identifier(),
                                %refusal,
                                "Message refused"
                            );
                            Ok(Outcome::Continue(Some(Envelope::relay_refused(
                                session.identifier(),
                                &refusal,
                            ))))
                        }
                        None => Err(e),
                    },
                }
            }
        }
    }

    /// Apply a command queued by another session's worker
    pub async fn apply(
        &self,
        session: &mut ParticipantSession,
        command: SessionCommand,
    ) -> Option<Envelope> {
        match command {
            SessionCommand::PairingRequest { from } => pairing::accept_request(session, &from),
            SessionCommand::PairingResolved { from, status } => {
                pairing::accept_resolution(session, &self.registry, &from, status).await
            }
            SessionCommand::Deliver { from, message } => relay::deliver(session, &from, message),
            SessionCommand::PeerGone { identifier } => pairing::release_peer(session, &identifier),
        }
    }

    /// Remove the session from the registry and notify its counterpart
    pub async fn teardown(&self, session: &ParticipantSession) {
        self.registry.remove(session.identifier()).await;
        pairing::notify_departure(session, &self.registry).await;
        debug!(identifier = session.identifier(), "Session torn down");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::envelope::Status;
    use crate::session::participant::SessionHandle;
    use tokio::sync::mpsc;

    async fn join(
        registry: &Registry,
        identifier: &str,
    ) -> (ParticipantSession, mpsc::Receiver<SessionCommand>) {
        let (tx, rx) = mpsc::channel(8);
        registry
            .register(SessionHandle::new(identifier, tx))
            .await
            .unwrap();
        (ParticipantSession::new(identifier, 2), rx)
    }

    #[tokio::test]
    async fn test_pairing_round_trip_through_commands() {
        let registry = Registry::new(10);
        let dispatcher = Dispatcher::new(registry.clone(), SessionConfig::default());
        let (mut alice, mut alice_rx) = join(&registry, "alice").await;
        let (mut bob, mut bob_rx) = join(&registry, "bob").await;

        let request = Frame::PairingRequest {
            from: "alice".into(),
            to: Some("bob".into()),
        };
        assert_eq!(
            dispatcher.dispatch(&mut alice, request).await.unwrap(),
            Outcome::Continue(None)
        );

        let forwarded = bob_rx.recv().await.unwrap();
        let to_bob = dispatcher.apply(&mut bob, forwarded).await.unwrap();
        assert_eq!(to_bob.encode(), "from:alice|req:msg");

        let confirm = Frame::PairingReply {
            from: "bob".into(),
            to: Some("alice".into()),
            status: Status::Success,
        };
        dispatcher.dispatch(&mut bob, confirm).await.unwrap();
        assert_eq!(bob.peer(), Some("alice"));

        let resolved = alice_rx.recv().await.unwrap();
        let to_alice = dispatcher.apply(&mut alice, resolved).await.unwrap();
        assert_eq!(to_alice.encode(), "from:bob|req:msg|stat:success");
        assert_eq!(alice.peer(), Some("bob"));
    }

    #[tokio::test]
    async fn test_missing_target_replies_failed_to_sender() {
        let registry = Registry::new(10);
        let dispatcher = Dispatcher::new(registry.clone(), SessionConfig::default());
        let (mut alice, _alice_rx) = join(&registry, "alice").await;

        let request = Frame::PairingRequest {
            from: "alice".into(),
            to: Some("carol".into()),
        };
        let outcome = dispatcher.dispatch(&mut alice, request).await.unwrap();
        let Outcome::Continue(Some(reply)) = outcome else {
            panic!("expected a reply, got {outcome:?}");
        };
        assert_eq!(reply.encode(), "from:carol|req:msg|stat:failed");
        assert!(!alice.pairing().is_pending());
    }

    #[tokio::test]
    async fn test_quota_policy_closes_when_configured() {
        let registry = Registry::new(10);
        let config = SessionConfig {
            message_quota: 2,
            close_on_quota_exhausted: true,
        };
        let dispatcher = Dispatcher::new(registry.clone(), config);
        let (_bob, _bob_rx) = join(&registry, "bob").await;
        let mut alice = ParticipantSession::new("alice", 0);
        alice.pairing_mut().receive_request("bob");
        alice.pairing_mut().confirm("bob").unwrap();

        let chat = Frame::Chat {
            from: "alice".into(),
            to: None,
            message: "hi".into(),
        };
        assert_eq!(
            dispatcher.dispatch(&mut alice, chat).await.unwrap(),
            Outcome::Close
        );
    }

    #[tokio::test]
    async fn test_refused_chat_is_answered() {
        let registry = Registry::new(10);
        let dispatcher = Dispatcher::new(registry.clone(), SessionConfig::default());
        let (mut alice, _alice_rx) = join(&registry, "alice").await;

        let chat = Frame::Chat {
            from: "alice".into(),
            to: None,
            message: "anyone?".into(),
        };
        let outcome = dispatcher.dispatch(&mut alice, chat).await.unwrap();
        let Outcome::Continue(Some(reply)) = outcome else {
            panic!("expected a refusal, got {outcome:?}");
        };
        assert_eq!(reply.encode(), "from:alice|msg:no_peer|stat:failed");
    }

    #[tokio::test]
    async fn test_exhausted_quota_is_answered_when_kept_open() {
        let registry = Registry::new(10);
        let dispatcher = Dispatcher::new(registry.clone(), SessionConfig::default());
        let (_bob, _bob_rx) = join(&registry, "bob").await;
        let mut alice = ParticipantSession::new("alice", 0);
        alice.pairing_mut().receive_request("bob");
        alice.pairing_mut().confirm("bob").unwrap();

        let chat = Frame::Chat {
            from: "alice".into(),
            to: None,
            message: "hi".into(),
        };
        let Outcome::Continue(Some(reply)) = dispatcher.dispatch(&mut alice, chat).await.unwrap()
        else {
            panic!("expected a refusal");
        };
        assert_eq!(
            Frame::try_from(reply).unwrap(),
            Frame::RelayRefused {
                from: "alice".into(),
                refusal: RelayRefusal::QuotaExceeded(0),
            }
        );
    }

    #[tokio::test]
    async fn test_withdrawn_request_releases_target() {
        let registry = Registry::new(10);
        let dispatcher = Dispatcher::new(registry.clone(), SessionConfig::default());
        let (mut alice, _alice_rx) = join(&registry, "alice").await;
        let (mut bob, mut bob_rx) = join(&registry, "bob").await;

        let request = Frame::PairingRequest {
            from: "alice".into(),
            to: Some("bob".into()),
        };
        dispatcher.dispatch(&mut alice, request).await.unwrap();
        let forwarded = bob_rx.recv().await.unwrap();
        dispatcher.apply(&mut bob, forwarded).await;
        assert_eq!(bob.pairing().counterpart(), Some("alice"));

        let withdraw = Frame::PairingReply {
            from: "alice".into(),
            to: Some("bob".into()),
            status: Status::Failed,
        };
        assert_eq!(
            dispatcher.dispatch(&mut alice, withdraw).await.unwrap(),
            Outcome::Continue(None)
        );
        assert_eq!(alice.pairing().counterpart(), None);

        let gone = bob_rx.recv().await.unwrap();
        let to_bob = dispatcher.apply(&mut bob, gone).await.unwrap();
        assert_eq!(to_bob.encode(), "from:alice|req:msg|stat:failed");
        assert_eq!(bob.pairing().counterpart(), None);
    }

    #[tokio::test]
    async fn test_teardown_notifies_peer() {
        let registry = Registry::new(10);
        let dispatcher = Dispatcher::new(registry.clone(), SessionConfig::default());
        let (mut alice, _alice_rx) = join(&registry, "alice").await;
        let (_bob, mut bob_rx) = join(&registry, "bob").await;
        alice.pairing_mut().begin_request("bob");
        alice.pairing_mut().resolve("bob", Status::Success).unwrap();

        dispatcher.teardown(&alice).await;
        assert!(!registry.contains("alice").await);
        assert_eq!(
            bob_rx.recv().await.unwrap(),
            SessionCommand::PeerGone {
                identifier: "alice".into()
            }
        );
    }

    #[tokio::test]
    async fn test_second_handshake_is_unexpected() {
        let registry = Registry::new(10);
        let dispatcher = Dispatcher::new(registry.clone(), SessionConfig::default());
        let (mut alice, _rx) = join(&registry, "alice").await;
        let err = dispatcher
            .dispatch(
                &mut alice,
                Frame::HandshakeRequest {
                    from: "alice".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedMessage(_)));
    }
}
