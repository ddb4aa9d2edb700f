//! Pairing negotiation.
//!
//! [`PairingState`] is the per-participant state machine. Clients drive it
//! directly; the server keeps a mirror of every participant's state so that
//! it can forward requests, bind peers on confirmation and refuse relays from
//! unpaired sessions.
//!
//! ```text
//! Unpaired --begin_request--> RequestSent{to} --resolve(SUCCESS)--> Paired{peer}
//!    |                              `--resolve(FAILED)--> Unpaired
//!    `--receive_request--> RequestReceived{from} --confirm--> Paired{peer}
//!                                   `--decline--> Unpaired
//! ```
//!
//! A request to a participant that is not registered is answered by the
//! server with a FAILED reply that appears to come from the missing target.

use tracing::{debug, info, warn};

use crate::core::envelope::{Envelope, Status};
use crate::error::{ProtocolError, Result};
use crate::session::participant::{ParticipantSession, SessionCommand};
use crate::session::registry::Registry;
use crate::utils::metrics::global_metrics;

/// Outcome of asking to pair with someone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingRequest {
    /// The request went out and a reply is awaited
    Pending,
    /// Already paired; nothing was sent
    AlreadyPaired,
}

/// What to do with an incoming pairing request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingRequest {
    Accept,
    Drop,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PairingState {
    #[default]
    Unpaired,
    RequestSent {
        to: String,
    },
    RequestReceived {
        from: String,
    },
    Paired {
        peer: String,
    },
}

impl PairingState {
    pub fn peer(&self) -> Option<&str> {
        match self {
            PairingState::Paired { peer } => Some(peer),
            _ => None,
        }
    }

    pub fn is_paired(&self) -> bool {
        matches!(self, PairingState::Paired { .. })
    }

    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            PairingState::RequestSent { .. } | PairingState::RequestReceived { .. }
        )
    }

    /// The other participant this state refers to, paired or pending
    pub fn counterpart(&self) -> Option<&str> {
        match self {
            PairingState::Unpaired => None,
            PairingState::RequestSent { to } => Some(to),
            PairingState::RequestReceived { from } => Some(from),
            PairingState::Paired { peer } => Some(peer),
        }
    }

    /// Start a pairing attempt with `target`.
    ///
    /// A paired participant stays as it is. A pending attempt is abandoned in
    /// favour of the new one, so at most one attempt is ever outstanding.
    pub fn begin_request(&mut self, target: &str) -> PairingRequest {
        if self.is_paired() {
            return PairingRequest::AlreadyPaired;
        }
        *self = PairingState::RequestSent {
            to: target.to_string(),
        };
        PairingRequest::Pending
    }

    /// Consider a request from `from`. Only an unpaired participant accepts.
    pub fn receive_request(&mut self, from: &str) -> IncomingRequest {
        match self {
            PairingState::Unpaired => {
                *self = PairingState::RequestReceived {
                    from: from.to_string(),
                };
                IncomingRequest::Accept
            }
            _ => IncomingRequest::Drop,
        }
    }

    /// Confirm the request received from `from`
    pub fn confirm(&mut self, from: &str) -> Result<()> {
        match self {
            PairingState::RequestReceived { from: pending } if pending.as_str() == from => {
                *self = PairingState::Paired {
                    peer: from.to_string(),
                };
                Ok(())
            }
            _ => Err(self.unexpected("confirmation", from)),
        }
    }

    /// Turn down the request received from `from`
    pub fn decline(&mut self, from: &str) -> Result<()> {
        match self {
            PairingState::RequestReceived { from: pending } if pending.as_str() == from => {
                *self = PairingState::Unpaired;
                Ok(())
            }
            _ => Err(self.unexpected("rejection", from)),
        }
    }

    /// Apply the reply to an outgoing request.
    ///
    /// Returns the new peer on success. A FAILED reply resets the state and
    /// yields `PairingRejected`.
    pub fn resolve(&mut self, from: &str, status: Status) -> Result<String> {
        match self {
            PairingState::RequestSent { to } if to.as_str() == from => match status {
                Status::Success => {
                    *self = PairingState::Paired {
                        peer: from.to_string(),
                    };
                    Ok(from.to_string())
                }
                Status::Failed => {
                    *self = PairingState::Unpaired;
                    Err(ProtocolError::PairingRejected(from.to_string()))
                }
            },
            _ => Err(self.unexpected("pairing reply", from)),
        }
    }

    /// Forget any link to `identifier`. Returns whether one existed.
    pub fn release(&mut self, identifier: &str) -> bool {
        if self.counterpart() == Some(identifier) {
            *self = PairingState::Unpaired;
            true
        } else {
            false
        }
    }

    /// Abandon a pending attempt after the wait for it ran out
    pub fn timeout(&mut self) {
        if self.is_pending() {
            *self = PairingState::Unpaired;
        }
    }

    fn unexpected(&self, what: &str, from: &str) -> ProtocolError {
        ProtocolError::UnexpectedMessage(format!("{} from {} while {:?}", what, from, self))
    }
}

/// Handle `session`'s request to pair with `target`.
///
/// Returns the envelope to write back to `session`, if any.
pub async fn forward_request(
    session: &mut ParticipantSession,
    registry: &Registry,
    target: &str,
) -> Result<Option<Envelope>> {
    let metrics = global_metrics();
    metrics.pairing_requested();

    if session.pairing_mut().begin_request(target) == PairingRequest::AlreadyPaired {
        debug!(
            identifier = session.identifier(),
            to = target,
            "Dropping pairing request from paired session"
        );
        return Ok(None);
    }

    let forwarded = if target == session.identifier() {
        false
    } else {
        match registry.lookup(target).await {
            Some(handle) => handle
                .push(SessionCommand::PairingRequest {
                    from: session.identifier().to_string(),
                })
                .is_ok(),
            None => false,
        }
    };

    if forwarded {
        debug!(identifier = session.identifier(), to = target, "Pairing request forwarded");
        return Ok(None);
    }

    session.pairing_mut().release(target);
    metrics.pairing_failed();
    info!(
        identifier = session.identifier(),
        to = target,
        "Pairing target not registered"
    );
    Ok(Some(Envelope::pairing_reply(target, None, Status::Failed)))
}

/// Handle a reply sent by `session` about `initiator`.
///
/// Usually this answers a request `initiator` sent. A FAILED reply about the
/// participant `session` itself asked (or is already bound to) withdraws that
/// attempt instead; clients send one when their wait for a pairing runs out.
pub async fn forward_reply(
    session: &mut ParticipantSession,
    registry: &Registry,
    initiator: &str,
    status: Status,
) -> Result<Option<Envelope>> {
    if status == Status::Failed && is_own_attempt(session.pairing(), initiator) {
        withdraw_request(session, registry, initiator).await;
        return Ok(None);
    }

    match status {
        Status::Success => session.pairing_mut().confirm(initiator)?,
        Status::Failed => session.pairing_mut().decline(initiator)?,
    }

    let delivered = match registry.lookup(initiator).await {
        Some(handle) => handle
            .push(SessionCommand::PairingResolved {
                from: session.identifier().to_string(),
                status,
            })
            .is_ok(),
        None => false,
    };

    if delivered || status == Status::Failed {
        return Ok(None);
    }

    session.pairing_mut().release(initiator);
    global_metrics().pairing_failed();
    info!(
        identifier = session.identifier(),
        initiator, "Pairing initiator left before confirmation"
    );
    Ok(Some(Envelope::pairing_reply(initiator, None, Status::Failed)))
}

fn is_own_attempt(state: &PairingState, counterpart: &str) -> bool {
    match state {
        PairingState::RequestSent { to } => to.as_str() == counterpart,
        PairingState::Paired { peer } => peer.as_str() == counterpart,
        _ => false,
    }
}

/// Abandon `session`'s attempt to pair with `target`, releasing both mirrors
async fn withdraw_request(session: &mut ParticipantSession, registry: &Registry, target: &str) {
    notify_departure(session, registry).await;
    session.pairing_mut().release(target);
    global_metrics().pairing_failed();
    info!(
        identifier = session.identifier(),
        to = target,
        "Pairing attempt withdrawn"
    );
}

/// Apply a forwarded request to the receiving session's mirror.
///
/// The request reaches the target re-issued with `from` only; the `to` the
/// initiator wrote is not passed on.
pub fn accept_request(session: &mut ParticipantSession, from: &str) -> Option<Envelope> {
    match session.pairing_mut().receive_request(from) {
        IncomingRequest::Accept => Some(Envelope::pairing_request(from, None)),
        IncomingRequest::Drop => {
            debug!(
                identifier = session.identifier(),
                from, "Dropping pairing request, session busy"
            );
            None
        }
    }
}

/// Apply the target's answer to the initiating session's mirror
pub async fn accept_resolution(
    session: &mut ParticipantSession,
    registry: &Registry,
    from: &str,
    status: Status,
) -> Option<Envelope> {
    let metrics = global_metrics();

    match session.pairing_mut().resolve(from, status) {
        Ok(peer) => {
            metrics.pairing_established();
            info!(identifier = session.identifier(), peer = %peer, "Pairing established");
            Some(Envelope::pairing_reply(from, None, Status::Success))
        }
        Err(ProtocolError::PairingRejected(_)) => {
            metrics.pairing_failed();
            Some(Envelope::pairing_reply(from, None, Status::Failed))
        }
        Err(e) => {
            warn!(identifier = session.identifier(), error = %e, "Stale pairing reply");
            // The target already considers itself paired with us
            if status == Status::Success {
                if let Some(handle) = registry.lookup(from).await {
                    if let Err(e) = handle.push(SessionCommand::PeerGone {
                        identifier: session.identifier().to_string(),
                    }) {
                        debug!(
                            identifier = session.identifier(),
                            peer = from,
                            error = %e,
                            "Could not release stale pairing"
                        );
                    }
                }
            }
            None
        }
    }
}

/// Drop the link to a departed participant, telling the client if there was one
pub fn release_peer(session: &mut ParticipantSession, identifier: &str) -> Option<Envelope> {
    if session.pairing_mut().release(identifier) {
        info!(
            identifier = session.identifier(),
            peer = identifier,
            "Peer link lost"
        );
        Some(Envelope::pairing_reply(identifier, None, Status::Failed))
    } else {
        None
    }
}

/// Tell the counterpart of a closing session that it is gone
pub async fn notify_departure(session: &ParticipantSession, registry: &Registry) {
    let Some(counterpart) = session.pairing().counterpart() else {
        return;
    };
    if let Some(handle) = registry.lookup(counterpart).await {
        if let Err(e) = handle.push(SessionCommand::PeerGone {
            identifier: session.identifier().to_string(),
        }) {
            debug!(identifier = session.identifier(), error = %e, "Counterpart already gone");
        }
    }
}
