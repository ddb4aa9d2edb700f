//! Chatting over an established pairing.
//!
//! A paired [`RelayClient`](crate::service::client::RelayClient) can be split
//! into a [`ChatSender`] and a [`ChatInbox`] so that sending and receiving run
//! independently. The two halves share a link flag: once the inbox sees the
//! peer leave, the sender refuses further messages with `NoPeer`.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::core::codec::{Decoded, EnvelopeCodec};
use crate::core::envelope::{Envelope, Frame, RelayRefusal, Status};
use crate::error::{ProtocolError, Result};
use crate::protocol::relay::split_tag;
use crate::session::participant::Quota;

/// A chat message received from the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub from: String,
    /// Sender-side sequence number, when the message carried a tag
    pub sequence: Option<u32>,
    pub text: String,
}

impl IncomingMessage {
    fn from_tagged(from: String, message: String) -> Self {
        match split_tag(&message) {
            Some((sequence, text)) => Self {
                from,
                sequence: Some(sequence),
                text: text.to_string(),
            },
            None => Self {
                from,
                sequence: None,
                text: message,
            },
        }
    }
}

/// Something the peer did, or the relay refused to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Message(IncomingMessage),
    /// The peer disconnected; the pairing is over
    PeerLeft(String),
    /// The relay did not pass one of our messages on
    Refused(RelayRefusal),
}

/// Interpret one inbound line for a client paired with `peer`
pub(crate) fn interpret(decoded: Decoded, peer: &str) -> Option<ChatEvent> {
    let frame = match decoded.and_then(Frame::try_from) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "Ignoring malformed envelope");
            return None;
        }
    };

    match frame {
        Frame::Chat { from, message, .. } if from == peer => {
            Some(ChatEvent::Message(IncomingMessage::from_tagged(from, message)))
        }
        Frame::PairingReply {
            from,
            status: Status::Failed,
            ..
        } if from == peer => Some(ChatEvent::PeerLeft(from)),
        Frame::RelayRefused { refusal, .. } => Some(ChatEvent::Refused(refusal)),
        Frame::PairingRequest { from, .. } => {
            debug!(from = %from, "Dropping pairing request, already paired");
            None
        }
        other => {
            debug!(opcode = other.opcode(), "Ignoring frame while chatting");
            None
        }
    }
}

/// Sending half of a paired client
pub struct ChatSender<T> {
    sink: SplitSink<Framed<T, EnvelopeCodec>, Envelope>,
    identifier: String,
    peer: String,
    quota: Quota,
    linked: watch::Receiver<bool>,
}

/// Receiving half of a paired client
pub struct ChatInbox<T> {
    stream: SplitStream<Framed<T, EnvelopeCodec>>,
    peer: String,
    linked: watch::Sender<bool>,
}

pub(crate) fn split<T>(
    framed: Framed<T, EnvelopeCodec>,
    identifier: String,
    peer: String,
    quota: Quota,
) -> (ChatSender<T>, ChatInbox<T>)
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let (sink, stream) = framed.split::<Envelope>();
    let (linked_tx, linked_rx) = watch::channel(true);

    let sender = ChatSender {
        sink,
        identifier,
        peer: peer.clone(),
        quota,
        linked: linked_rx,
    };
    let inbox = ChatInbox {
        stream,
        peer,
        linked: linked_tx,
    };
    (sender, inbox)
}

impl<T> ChatSender<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Send `text` to the peer, returning its sequence number
    pub async fn send_message(&mut self, text: &str) -> Result<u32> {
        if !*self.linked.borrow() {
            return Err(ProtocolError::NoPeer);
        }
        let sequence = self.quota.next_sequence()?;

        self.sink
            .send(Envelope::chat(
                self.identifier.as_str(),
                Some(self.peer.clone()),
                text,
            ))
            .await?;
        self.quota.advance();
        debug!(peer = %self.peer, sequence, "Message sent");
        Ok(sequence)
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn quota(&self) -> &Quota {
        &self.quota
    }

    /// Whether the peer is still connected, as far as the inbox has seen
    pub fn is_linked(&self) -> bool {
        *self.linked.borrow()
    }

    /// Flush and close the write side of the connection
    pub async fn close(mut self) -> Result<()> {
        self.sink.close().await
    }
}

impl<T> ChatInbox<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Wait for the next event from the peer. `None` means the server closed
    /// the connection.
    pub async fn next_event(&mut self) -> Result<Option<ChatEvent>> {
        while let Some(decoded) = self.stream.next().await {
            if let Some(event) = interpret(decoded?, &self.peer) {
                if matches!(
                    event,
                    ChatEvent::PeerLeft(_) | ChatEvent::Refused(RelayRefusal::NoPeer)
                ) {
                    let _ = self.linked.send(false);
                }
                return Ok(Some(event));
            }
        }
        let _ = self.linked.send(false);
        Ok(None)
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Deliver every incoming message to `callback` from a background task.
    ///
    /// The task ends when the peer leaves or the connection closes. Refused
    /// messages are logged and skipped.
    pub fn on_incoming_message<F>(mut self, mut callback: F) -> JoinHandle<Result<()>>
    where
        F: FnMut(IncomingMessage) + Send + 'static,
        T: Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(event) = self.next_event().await? {
                match event {
                    ChatEvent::Message(message) => callback(message),
                    ChatEvent::PeerLeft(peer) => {
                        info!(peer = %peer, "Peer left the conversation");
                        break;
                    }
                    ChatEvent::Refused(refusal) => {
                        warn!(%refusal, "Relay refused a message");
                    }
                }
            }
            Ok(())
        })
    }
}
