//! Timeout and retry helpers
//!
//! Every read in the relay protocol is bounded. A timed-out read is not an
//! error by itself: it spends one unit of a [`RetryBudget`], and only an
//! exhausted budget fails the surrounding operation.

use std::future::Future;
use std::time::Duration;

use futures::{Stream, StreamExt};

use crate::error::{ProtocolError, Result};

/// Default timeout for establishing a connection
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-read timeout while waiting for a handshake envelope
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-read timeout while waiting for a pairing outcome
pub const PAIRING_TIMEOUT: Duration = Duration::from_secs(60);

/// Time allowed for connections to drain on shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Timed-out reads the server tolerates during a handshake
pub const SERVER_HANDSHAKE_RETRIES: u32 = 3;

/// Timed-out reads the client tolerates while waiting for its acknowledgment
pub const CLIENT_HANDSHAKE_RETRIES: u32 = 4;

/// Timed-out reads tolerated while waiting for a pairing outcome
pub const PAIRING_RETRIES: u32 = 4;

/// Run a fallible future, mapping an elapsed deadline to `ProtocolError::Timeout`
pub async fn with_timeout_error<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}

/// Result of a single bounded read
#[derive(Debug)]
pub enum ReadOutcome<T> {
    Item(T),
    TimedOut,
    Closed,
}

/// Read the next stream item, giving up after `duration`
pub async fn next_within<S>(stream: &mut S, duration: Duration) -> ReadOutcome<S::Item>
where
    S: Stream + Unpin,
{
    match tokio::time::timeout(duration, stream.next()).await {
        Ok(Some(item)) => ReadOutcome::Item(item),
        Ok(None) => ReadOutcome::Closed,
        Err(_) => ReadOutcome::TimedOut,
    }
}

/// Fixed number of timed-out attempts an operation may absorb
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    total: u32,
    remaining: u32,
}

impl RetryBudget {
    pub fn new(total: u32) -> Self {
        Self {
            total,
            remaining: total,
        }
    }

    /// Record one timed-out attempt. Returns `true` while attempts remain.
    pub fn spend(&mut self) -> bool {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining > 0
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }
}
