//! Per-connection participant state.
//!
//! A [`ParticipantSession`] is owned by exactly one connection worker. Other
//! workers reach it only through its [`SessionHandle`], which enqueues
//! [`SessionCommand`]s that the owning worker applies in order.

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::core::envelope::Status;
use crate::error::{ProtocolError, Result};
use crate::protocol::pairing::PairingState;

/// Work pushed into a session by another connection's worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// `from` asks to pair with this session
    PairingRequest { from: String },
    /// `from` answered a pairing request this session sent
    PairingResolved { from: String, status: Status },
    /// A relayed, already tagged chat message
    Deliver { from: String, message: String },
    /// `identifier` disconnected or dropped its link to this session
    PeerGone { identifier: String },
}

/// Addressable reference to a registered session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    identifier: String,
    outbound: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn new(identifier: impl Into<String>, outbound: mpsc::Sender<SessionCommand>) -> Self {
        Self {
            identifier: identifier.into(),
            outbound,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Enqueue a command without waiting.
    ///
    /// A closed or saturated queue means the owning worker cannot take the
    /// command, which is reported as `PeerUnreachable`.
    pub fn push(&self, command: SessionCommand) -> Result<()> {
        self.outbound.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) | TrySendError::Closed(_) => {
                ProtocolError::PeerUnreachable(self.identifier.clone())
            }
        })
    }

    /// Whether the owning worker has gone away
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    /// Whether both handles feed the same session queue
    pub fn same_session(&self, other: &SessionHandle) -> bool {
        self.outbound.same_channel(&other.outbound)
    }
}

/// Outbound message allowance for one participant.
///
/// Sequence numbers start at 1. A number is only consumed by [`Quota::advance`],
/// which callers invoke after the message has actually been handed off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    limit: u32,
    next: u32,
}

impl Quota {
    pub fn new(limit: u32) -> Self {
        Self { limit, next: 1 }
    }

    /// Sequence number the next message would carry
    pub fn next_sequence(&self) -> Result<u32> {
        if self.next > self.limit {
            return Err(ProtocolError::QuotaExceeded(self.limit));
        }
        Ok(self.next)
    }

    pub fn advance(&mut self) {
        self.next = self.next.saturating_add(1);
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn sent(&self) -> u32 {
        self.next - 1
    }

    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.sent())
    }

    pub fn is_exhausted(&self) -> bool {
        self.next > self.limit
    }

    /// Lower the limit to `limit` if it is currently higher
    pub fn clamp(&mut self, limit: u32) {
        self.limit = self.limit.min(limit);
    }
}

/// Server-side view of one registered participant
#[derive(Debug)]
pub struct ParticipantSession {
    identifier: String,
    pairing: PairingState,
    quota: Quota,
}

impl ParticipantSession {
    pub fn new(identifier: impl Into<String>, message_quota: u32) -> Self {
        Self {
            identifier: identifier.into(),
            pairing: PairingState::default(),
            quota: Quota::new(message_quota),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn pairing(&self) -> &PairingState {
        &self.pairing
    }

    pub fn pairing_mut(&mut self) -> &mut PairingState {
        &mut self.pairing
    }

    pub fn peer(&self) -> Option<&str> {
        self.pairing.peer()
    }

    pub fn quota(&self) -> &Quota {
        &self.quota
    }

    pub fn quota_mut(&mut self) -> &mut Quota {
        &mut self.quota
    }
}
