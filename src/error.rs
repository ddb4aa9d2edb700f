//! # Error Types
//!
//! Error handling for the relay protocol.
//!
//! This module defines every error variant that can occur while a participant
//! registers, pairs, and exchanges messages through the relay, from low-level
//! I/O failures to protocol violations.
//!
//! ## Error Categories
//! - **I/O Errors**: socket failures and closed connections
//! - **Codec Errors**: unparseable or category-mixed envelopes, oversized lines
//! - **Handshake Errors**: rejected, timed out, or duplicate identifiers
//! - **Pairing Errors**: rejected or timed out pairing attempts
//! - **Relay Errors**: missing peer, exhausted quota, unreachable peer
//!
//! How far an error reaches differs per variant: a malformed envelope only
//! spoils the exchange that produced it, a handshake failure ends the
//! connection, and nothing ever takes down the acceptor loop.
//! See [`ProtocolError::is_fatal_to_connection`].
//!
//! ## Example Usage
//! ```rust
//! use chat_relay::error::{ProtocolError, Result};
//! use tracing::{error, info};
//!
//! fn check_identifier(id: &str) -> Result<&str> {
//!     if id.is_empty() {
//!         return Err(ProtocolError::MalformedEnvelope("empty identifier".into()));
//!     }
//!     Ok(id)
//! }
//!
//! match check_identifier("alice") {
//!     Ok(id) => info!(identifier = id, "Identifier accepted"),
//!     Err(e) => error!(error = %e, "Identifier rejected"),
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Codec errors
    pub const ERR_MISSING_SEPARATOR: &str = "Field has no key-value separator";
    pub const ERR_UNKNOWN_REQUEST: &str = "Unknown request kind";
    pub const ERR_UNKNOWN_STATUS: &str = "Unknown status value";
    pub const ERR_MIXED_CATEGORIES: &str = "Envelope mixes fields from several categories";
    pub const ERR_MISSING_FROM: &str = "Envelope has no sender";
    pub const ERR_MISSING_TO: &str = "Envelope has no recipient";
    pub const ERR_UNKNOWN_REFUSAL: &str = "Unknown relay refusal";

    /// Handshake errors
    pub const ERR_NOT_A_HANDSHAKE: &str = "Expected a handshake request";
    pub const ERR_INVALID_ACK: &str = "Invalid handshake acknowledgment from server";
    pub const ERR_INSTANCE_MISMATCH: &str = "Echoed instance identifier does not match";
    pub const ERR_ALREADY_REGISTERED: &str = "Connection already registered";
    pub const ERR_CLIENT_REFUSAL: &str = "Relay refusals are sent by the server only";
    pub const ERR_NOT_REGISTERED: &str = "Connection has not completed the handshake";
}

/// ProtocolError is the primary error type for all relay operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Envelope too large: exceeds {0} bytes")]
    OversizedEnvelope(usize),

    #[error("Identifier already registered: {0}")]
    DuplicateIdentifier(String),

    #[error("Relay is at capacity ({0} participants)")]
    CapacityReached(usize),

    #[error("Handshake rejected for {0}")]
    HandshakeRejected(String),

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Handshake timed out after {0} attempts")]
    HandshakeTimeout(u32),

    #[error("Pairing rejected by {0}")]
    PairingRejected(String),

    #[error("Pairing timed out after {0} attempts")]
    PairingTimeout(u32),

    #[error("No peer is paired with this session")]
    NoPeer,

    #[error("Message quota of {0} exhausted")]
    QuotaExceeded(u32),

    #[error("Peer {0} is unreachable")]
    PeerUnreachable(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ProtocolError {
    /// Whether this error ends the connection that produced it.
    ///
    /// Codec, pairing and relay errors leave the connection usable; handshake
    /// failures, timeouts on the handshake and I/O errors do not.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(_)
                | ProtocolError::OversizedEnvelope(_)
                | ProtocolError::DuplicateIdentifier(_)
                | ProtocolError::CapacityReached(_)
                | ProtocolError::HandshakeRejected(_)
                | ProtocolError::HandshakeError(_)
                | ProtocolError::HandshakeTimeout(_)
                | ProtocolError::ConnectionClosed
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_errors_keep_connection() {
        assert!(!ProtocolError::MalformedEnvelope("x".into()).is_fatal_to_connection());
        assert!(!ProtocolError::QuotaExceeded(3).is_fatal_to_connection());
        assert!(!ProtocolError::PairingTimeout(4).is_fatal_to_connection());
        assert!(!ProtocolError::PeerUnreachable("bob".into()).is_fatal_to_connection());
    }

    #[test]
    fn test_handshake_errors_end_connection() {
        assert!(ProtocolError::DuplicateIdentifier("alice".into()).is_fatal_to_connection());
        assert!(ProtocolError::HandshakeTimeout(3).is_fatal_to_connection());
        assert!(ProtocolError::ConnectionClosed.is_fatal_to_connection());
    }

    #[test]
    fn test_display_includes_context() {
        let err = ProtocolError::QuotaExceeded(10);
        assert_eq!(err.to_string(), "Message quota of 10 exhausted");
        let err = ProtocolError::PairingRejected("carol".into());
        assert!(err.to_string().contains("carol"));
    }
}
