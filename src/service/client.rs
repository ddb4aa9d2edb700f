use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument, warn};

use crate::config::{ClientConfig, RelayConfig, DEFAULT_MESSAGE_QUOTA};
use crate::core::codec::EnvelopeCodec;
use crate::core::envelope::{Envelope, Frame, RelayRefusal, Status};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::handshake::client_handshake;
use crate::protocol::pairing::{IncomingRequest, PairingRequest, PairingState};
use crate::service::chat::{self, ChatEvent, ChatInbox, ChatSender};
use crate::session::participant::Quota;
use crate::utils::timeout::{next_within, with_timeout_error, ReadOutcome, RetryBudget};

/// Participant-side connection to a relay.
///
/// The usual sequence is [`connect`](Self::connect), [`register`](Self::register),
/// then either [`request_pairing`](Self::request_pairing) followed by
/// [`await_pairing`](Self::await_pairing), or just `await_pairing` to wait for
/// someone else's request. Once paired, messages flow through
/// [`send_message`](Self::send_message) and [`next_message`](Self::next_message),
/// or through the halves returned by [`into_split`](Self::into_split).
pub struct RelayClient<T = TcpStream> {
    framed: Framed<T, EnvelopeCodec>,
    config: ClientConfig,
    identifier: Option<String>,
    pairing: PairingState,
    quota: Quota,
    received: u32,
}

impl RelayClient<TcpStream> {
    /// Connect to a relay at `addr`
    #[instrument(skip(config))]
    pub async fn connect(addr: &str, config: ClientConfig) -> Result<Self> {
        let stream = with_timeout_error(
            async { Ok(TcpStream::connect(addr).await?) },
            config.connection_timeout,
        )
        .await?;
        debug!("Connected to relay");
        Ok(Self::from_stream(stream, config))
    }

    /// Connect to the address and quota named in a full configuration
    pub async fn connect_with(config: &RelayConfig) -> Result<Self> {
        let client = Self::connect(&config.client.address, config.client.clone()).await?;
        Ok(client.with_message_quota(config.session.message_quota))
    }
}

impl<T> RelayClient<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an already connected transport
    pub fn from_stream(stream: T, config: ClientConfig) -> Self {
        let codec = EnvelopeCodec::with_max_length(config.max_line_length);
        Self {
            framed: Framed::new(stream, codec),
            config,
            identifier: None,
            pairing: PairingState::default(),
            quota: Quota::new(DEFAULT_MESSAGE_QUOTA),
            received: 0,
        }
    }

    /// Use `limit` as the local message quota
    pub fn with_message_quota(mut self, limit: u32) -> Self {
        self.quota = Quota::new(limit);
        self
    }

    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub fn pairing_state(&self) -> &PairingState {
        &self.pairing
    }

    pub fn peer(&self) -> Option<&str> {
        self.pairing.peer()
    }

    pub fn quota(&self) -> &Quota {
        &self.quota
    }

    /// Messages received from the current peer
    pub fn received(&self) -> u32 {
        self.received
    }

    /// Whether both sides have used up the quota
    pub fn conversation_finished(&self) -> bool {
        self.quota.is_exhausted() && self.received >= self.quota.limit()
    }

    fn registered(&self) -> Result<&str> {
        self.identifier
            .as_deref()
            .ok_or_else(|| ProtocolError::UnexpectedMessage(constants::ERR_NOT_REGISTERED.into()))
    }

    /// Register under `identifier`
    pub async fn register(&mut self, identifier: &str) -> Result<()> {
        if self.identifier.is_some() {
            return Err(ProtocolError::UnexpectedMessage(
                constants::ERR_ALREADY_REGISTERED.into(),
            ));
        }

        client_handshake(
            &mut self.framed,
            identifier,
            self.config.handshake_timeout,
            self.config.handshake_retries,
        )
        .await?;

        info!(identifier, "Registered with relay");
        self.identifier = Some(identifier.to_string());
        Ok(())
    }

    /// Ask the relay to pair this participant with `target`.
    ///
    /// Nothing is sent when already paired. The outcome arrives through
    /// [`await_pairing`](Self::await_pairing).
    pub async fn request_pairing(&mut self, target: &str) -> Result<PairingRequest> {
        let identifier = self.registered()?.to_string();

        match self.pairing.begin_request(target) {
            PairingRequest::AlreadyPaired => {
                debug!(target_id = target, "Already paired, request not sent");
                Ok(PairingRequest::AlreadyPaired)
            }
            PairingRequest::Pending => {
                self.framed
                    .send(Envelope::pairing_request(identifier, Some(target.to_string())))
                    .await?;
                debug!(target_id = target, "Pairing request sent");
                Ok(PairingRequest::Pending)
            }
        }
    }

    /// Wait until this participant is paired and return the peer.
    ///
    /// While unpaired, an incoming request is confirmed automatically. While a
    /// request of ours is outstanding, other requests are dropped and the
    /// reply is awaited; a FAILED reply surfaces as `PairingRejected`. When the
    /// wait runs out, the outstanding request is withdrawn at the relay.
    pub async fn await_pairing(&mut self) -> Result<String> {
        let identifier = self.registered()?.to_string();
        if let Some(peer) = self.pairing.peer() {
            return Ok(peer.to_string());
        }

        let mut budget = RetryBudget::new(self.config.pairing_retries);
        loop {
            let decoded = match next_within(&mut self.framed, self.config.pairing_timeout).await {
                ReadOutcome::Item(decoded) => decoded?,
                ReadOutcome::TimedOut => {
                    if !budget.spend() {
                        self.withdraw(&identifier).await;
                        return Err(ProtocolError::PairingTimeout(budget.total()));
                    }
                    debug!(remaining = budget.remaining(), "Still waiting for pairing");
                    continue;
                }
                ReadOutcome::Closed => return Err(ProtocolError::ConnectionClosed),
            };

            let frame = match decoded.and_then(Frame::try_from) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "Ignoring malformed envelope while pairing");
                    continue;
                }
            };

            match frame {
                Frame::PairingRequest { from, .. } => {
                    if self.pairing.receive_request(&from) == IncomingRequest::Drop {
                        debug!(from = %from, "Pairing request dropped, attempt in progress");
                        continue;
                    }
                    self.framed
                        .send(Envelope::pairing_reply(
                            identifier.as_str(),
                            Some(from.clone()),
                            Status::Success,
                        ))
                        .await?;
                    self.pairing.confirm(&from)?;
                    self.received = 0;
                    info!(peer = %from, "Paired on incoming request");
                    return Ok(from);
                }
                Frame::PairingReply { from, status, .. } => {
                    match self.pairing.resolve(&from, status) {
                        Ok(peer) => {
                            self.received = 0;
                            info!(peer = %peer, "Pairing accepted");
                            return Ok(peer);
                        }
                        Err(e @ ProtocolError::PairingRejected(_)) => return Err(e),
                        Err(e) => warn!(error = %e, "Ignoring pairing reply"),
                    }
                }
                other => {
                    debug!(opcode = other.opcode(), "Ignoring frame while pairing");
                }
            }
        }
    }

    /// Tell the relay to forget an unanswered request and reset locally
    async fn withdraw(&mut self, identifier: &str) {
        if let PairingState::RequestSent { to } = &self.pairing {
            let withdrawal = Envelope::pairing_reply(identifier, Some(to.clone()), Status::Failed);
            if let Err(e) = self.framed.send(withdrawal).await {
                debug!(error = %e, "Could not withdraw pairing request");
            }
        }
        self.pairing.timeout();
    }

    /// Send `text` to the peer and return its sequence number.
    ///
    /// Refused locally with `NoPeer` before pairing and with `QuotaExceeded`
    /// once the quota is spent; nothing is written in either case.
    pub async fn send_message(&mut self, text: &str) -> Result<u32> {
        let identifier = self.registered()?.to_string();
        let peer = self.pairing.peer().ok_or(ProtocolError::NoPeer)?.to_string();
        let sequence = self.quota.next_sequence()?;

        self.framed
            .send(Envelope::chat(identifier, Some(peer), text))
            .await?;
        self.quota.advance();
        Ok(sequence)
    }

    /// Wait for the next event from the peer.
    ///
    /// `None` means the conversation is over: either the relay closed the
    /// connection or both sides have spent their quota. A
    /// [`ChatEvent::Refused`] also updates local state, so a relay quota lower
    /// than ours is enforced here from then on.
    pub async fn next_message(&mut self) -> Result<Option<ChatEvent>> {
        let peer = self.pairing.peer().ok_or(ProtocolError::NoPeer)?.to_string();
        if self.conversation_finished() {
            return Ok(None);
        }

        while let Some(decoded) = self.framed.next().await {
            let Some(event) = chat::interpret(decoded?, &peer) else {
                continue;
            };
            match &event {
                ChatEvent::Message(_) => self.received = self.received.saturating_add(1),
                ChatEvent::PeerLeft(gone) => {
                    self.pairing.release(gone);
                }
                ChatEvent::Refused(refusal) => {
                    warn!(%refusal, "Relay refused a message");
                    match refusal {
                        RelayRefusal::QuotaExceeded(limit) => self.quota.clamp(*limit),
                        RelayRefusal::NoPeer => {
                            self.pairing.release(&peer);
                        }
                        RelayRefusal::PeerUnreachable(_) => {}
                    }
                }
            }
            return Ok(Some(event));
        }
        Ok(None)
    }

    /// Split a paired client into independent sending and receiving halves
    pub fn into_split(self) -> Result<(ChatSender<T>, ChatInbox<T>)> {
        let identifier = self
            .identifier
            .ok_or_else(|| ProtocolError::UnexpectedMessage(constants::ERR_NOT_REGISTERED.into()))?;
        let peer = self
            .pairing
            .peer()
            .ok_or(ProtocolError::NoPeer)?
            .to_string();
        Ok(chat::split(self.framed, identifier, peer, self.quota))
    }

    /// Flush and close the connection
    pub async fn close(mut self) -> Result<()> {
        self.framed.close().await
    }
}
