//! Registration handshake.
//!
//! The client opens with `req=handshake, from=<id>`. The server answers with
//! `req=handshake, id=<id>, stat=success|failed` and, on failure, closes the
//! connection. Both halves are generic over the transport so they run the
//! same over TCP and in-memory pipes.
//!
//! Every read is bounded by a timeout. A timed-out read spends one retry; a
//! connection that closes before sending anything aborts at once.

use std::time::Duration;

use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument, warn};

use crate::core::codec::EnvelopeCodec;
use crate::core::envelope::{Envelope, Frame, Status};
use crate::error::{constants, ProtocolError, Result};
use crate::session::participant::{SessionCommand, SessionHandle};
use crate::session::registry::Registry;
use crate::utils::metrics::global_metrics;
use crate::utils::timeout::{next_within, ReadOutcome, RetryBudget};

/// Identifier echoed in a rejection when the client supplied none
pub const ANONYMOUS: &str = "anonymous";

/// Read the next envelope, spending retries on timeouts
async fn read_envelope<T>(
    framed: &mut Framed<T, EnvelopeCodec>,
    timeout: Duration,
    budget: &mut RetryBudget,
) -> Result<Result<Envelope>>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match next_within(framed, timeout).await {
            ReadOutcome::Item(decoded) => return decoded,
            ReadOutcome::TimedOut => {
                if !budget.spend() {
                    return Err(ProtocolError::HandshakeTimeout(budget.total()));
                }
                debug!(remaining = budget.remaining(), "Handshake read timed out, retrying");
            }
            ReadOutcome::Closed => return Err(ProtocolError::ConnectionClosed),
        }
    }
}

async fn reject<T>(framed: &mut Framed<T, EnvelopeCodec>, instance_id: &str)
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    global_metrics().handshake_failed();
    if let Err(e) = framed
        .send(Envelope::handshake_ack(instance_id, Status::Failed))
        .await
    {
        debug!(error = %e, "Could not deliver handshake rejection");
    }
}

/// Server side: read the proposed identifier and register it.
///
/// On success the identifier is bound in `registry` to a handle feeding
/// `outbound`, and is returned. Any failure has already been acknowledged
/// to the client with `stat=failed`.
#[instrument(skip(framed, registry, outbound))]
pub async fn server_handshake<T>(
    framed: &mut Framed<T, EnvelopeCodec>,
    registry: &Registry,
    outbound: mpsc::Sender<SessionCommand>,
    timeout: Duration,
    retries: u32,
) -> Result<String>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let metrics = global_metrics();
    metrics.handshake_attempt();
    let mut budget = RetryBudget::new(retries);

    let envelope = match read_envelope(framed, timeout, &mut budget).await {
        Ok(Ok(envelope)) => envelope,
        Ok(Err(e)) => {
            metrics.malformed_envelope();
            warn!(error = %e, "Malformed handshake envelope");
            reject(framed, ANONYMOUS).await;
            return Err(ProtocolError::HandshakeRejected(ANONYMOUS.to_string()));
        }
        Err(e @ ProtocolError::HandshakeTimeout(_)) => {
            warn!(error = %e, "Handshake abandoned");
            reject(framed, ANONYMOUS).await;
            return Err(e);
        }
        Err(e) => {
            metrics.handshake_failed();
            return Err(e);
        }
    };

    let fallback = envelope.from.clone();
    let identifier = match Frame::try_from(envelope) {
        Ok(Frame::HandshakeRequest { from }) => from,
        Ok(other) => {
            warn!(opcode = other.opcode(), "{}", constants::ERR_NOT_A_HANDSHAKE);
            let placeholder = fallback.unwrap_or_else(|| ANONYMOUS.to_string());
            reject(framed, &placeholder).await;
            return Err(ProtocolError::HandshakeRejected(placeholder));
        }
        Err(e) => {
            warn!(error = %e, "Handshake request rejected");
            let placeholder = fallback.unwrap_or_else(|| ANONYMOUS.to_string());
            reject(framed, &placeholder).await;
            return Err(ProtocolError::HandshakeRejected(placeholder));
        }
    };

    let handle = SessionHandle::new(identifier.clone(), outbound);
    if let Err(e) = registry.register(handle.clone()).await {
        info!(identifier = %identifier, error = %e, "Handshake refused");
        reject(framed, &identifier).await;
        return Err(e);
    }

    if let Err(e) = framed
        .send(Envelope::handshake_ack(identifier.as_str(), Status::Success))
        .await
    {
        registry.deregister(&handle).await;
        metrics.handshake_failed();
        return Err(e);
    }

    metrics.handshake_success();
    info!(identifier = %identifier, "Participant registered");
    Ok(identifier)
}

/// Client side: propose `identifier` and wait for the server's verdict
#[instrument(skip(framed))]
pub async fn client_handshake<T>(
    framed: &mut Framed<T, EnvelopeCodec>,
    identifier: &str,
    timeout: Duration,
    retries: u32,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    framed.send(Envelope::handshake_request(identifier)).await?;

    let mut budget = RetryBudget::new(retries);
    let envelope = read_envelope(framed, timeout, &mut budget)
        .await?
        .map_err(|e| ProtocolError::HandshakeError(format!("{}: {}", constants::ERR_INVALID_ACK, e)))?;

    match Frame::try_from(envelope) {
        Ok(Frame::HandshakeAck {
            status: Status::Failed,
            ..
        }) => Err(ProtocolError::HandshakeRejected(identifier.to_string())),
        Ok(Frame::HandshakeAck { instance_id, .. }) if instance_id != identifier => {
            Err(ProtocolError::HandshakeError(format!(
                "{}: expected {}, got {}",
                constants::ERR_INSTANCE_MISMATCH,
                identifier,
                instance_id
            )))
        }
        Ok(Frame::HandshakeAck { .. }) => {
            debug!(identifier, "Handshake acknowledged");
            Ok(())
        }
        Ok(other) => Err(ProtocolError::HandshakeError(format!(
            "{}: got {}",
            constants::ERR_INVALID_ACK,
            other.opcode()
        ))),
        Err(e) => Err(ProtocolError::HandshakeError(format!(
            "{}: {}",
            constants::ERR_INVALID_ACK,
            e
        ))),
    }
}
