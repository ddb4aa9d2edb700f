//! Connection worker.
//!
//! One worker owns one connection from handshake to teardown. It is the only
//! code that touches its [`ParticipantSession`] or writes to its socket;
//! everything other sessions want from it arrives on its command queue.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio_util::codec::Framed;
use tracing::{debug, instrument, warn};

use crate::config::RelayConfig;
use crate::core::codec::EnvelopeCodec;
use crate::core::envelope::Frame;
use crate::error::Result;
use crate::protocol::dispatcher::{Dispatcher, Outcome};
use crate::protocol::handshake::server_handshake;
use crate::session::participant::{ParticipantSession, SessionCommand};
use crate::session::registry::Registry;
use crate::utils::metrics::global_metrics;

/// Serve one connection until it closes, fails, or the server shuts down.
///
/// Returns `Ok` for an orderly close. Handshake failures and I/O errors are
/// returned after the session, if any, has been removed from the registry.
#[instrument(skip_all)]
pub async fn run_session<T>(
    stream: T,
    registry: Registry,
    config: Arc<RelayConfig>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(
        stream,
        EnvelopeCodec::with_max_length(config.server.max_line_length),
    );
    let (outbound, mut commands) = mpsc::channel(config.server.outbound_queue_limit);

    let identifier = server_handshake(
        &mut framed,
        &registry,
        outbound,
        config.server.handshake_timeout,
        config.server.handshake_retries,
    )
    .await?;

    let mut session = ParticipantSession::new(identifier, config.session.message_quota);
    let dispatcher = Dispatcher::new(registry, config.session.clone());

    let result = serve(
        &mut framed,
        &mut session,
        &dispatcher,
        &mut commands,
        &mut shutdown,
    )
    .await;

    dispatcher.teardown(&session).await;
    result
}

async fn serve<T>(
    framed: &mut Framed<T, EnvelopeCodec>,
    session: &mut ParticipantSession,
    dispatcher: &Dispatcher,
    commands: &mut mpsc::Receiver<SessionCommand>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let metrics = global_metrics();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!(identifier = session.identifier(), "Shutdown signalled");
                return Ok(());
            }

            command = commands.recv() => {
                let Some(command) = command else {
                    return Ok(());
                };
                if let Some(envelope) = dispatcher.apply(session, command).await {
                    framed.send(envelope).await?;
                }
            }

            inbound = framed.next() => {
                let decoded = match inbound {
                    None => {
                        debug!(identifier = session.identifier(), "Client closed connection");
                        return Ok(());
                    }
                    Some(Err(e)) => return Err(e),
                    Some(Ok(decoded)) => decoded,
                };

                let frame = match decoded.and_then(Frame::try_from) {
                    Ok(frame) => frame,
                    Err(e) => {
                        metrics.malformed_envelope();
                        warn!(identifier = session.identifier(), error = %e, "Discarding malformed envelope");
                        continue;
                    }
                };

                match dispatcher.dispatch(session, frame).await {
                    Ok(Outcome::Continue(Some(reply))) => framed.send(reply).await?,
                    Ok(Outcome::Continue(None)) => {}
                    Ok(Outcome::Close) => return Ok(()),
                    Err(e) => {
                        debug!(identifier = session.identifier(), error = %e, "Exchange failed");
                    }
                }
            }
        }
    }
}
