//! # Envelope Codec
//!
//! Tokio codec that frames envelopes as newline-terminated lines.
//!
//! Decoding yields `Result<Envelope>` items: a line that cannot be parsed is
//! handed to the caller as an item-level error instead of a stream error, so
//! one bad envelope never ends the connection. Stream-level errors are
//! reserved for I/O failures and lines longer than the configured limit.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::core::envelope::Envelope;
use crate::error::{ProtocolError, Result};

/// Default upper bound on a single envelope line
pub const DEFAULT_MAX_LINE_LENGTH: usize = 8 * 1024;

/// Outcome of decoding one line
pub type Decoded = Result<Envelope>;

#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    lines: LinesCodec,
    max_length: usize,
}

impl EnvelopeCodec {
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
            max_length,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn map_err(&self, err: LinesCodecError) -> ProtocolError {
        match err {
            LinesCodecError::MaxLineLengthExceeded => {
                ProtocolError::OversizedEnvelope(self.max_length)
            }
            LinesCodecError::Io(e) => ProtocolError::Io(e),
        }
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Decoded;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Decoded>> {
        match self.lines.decode(src) {
            Ok(Some(line)) => Ok(Some(Envelope::decode(&line))),
            Ok(None) => Ok(None),
            Err(e) => Err(self.map_err(e)),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Decoded>> {
        match self.lines.decode_eof(src) {
            Ok(Some(line)) => Ok(Some(Envelope::decode(&line))),
            Ok(None) => Ok(None),
            Err(e) => Err(self.map_err(e)),
        }
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = ProtocolError;

    fn encode(&mut self, env: Envelope, dst: &mut BytesMut) -> Result<()> {
        self.lines
            .encode(env.encode(), dst)
            .map_err(|e| self.map_err(e))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::envelope::Status;

    #[test]
    fn test_encode_appends_newline() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(Envelope::handshake_ack("alice", Status::Success), &mut buf)
            .unwrap();
        assert_eq!(&buf[..], b"id:alice|req:handshake|stat:success\n");
    }

    #[test]
    fn test_decode_waits_for_full_line() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::from(&b"from:alice|ms"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"g:hi\r\n");
        let env = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(env.message.as_deref(), Some("hi"));
    }

    #[test]
    fn test_malformed_line_is_item_error() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::from(&b"garbage\nfrom:alice|msg:ok\n"[..]);

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(first, Err(ProtocolError::MalformedEnvelope(_))));

        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert!(second.is_ok());
    }

    #[test]
    fn test_oversized_line_is_stream_error() {
        let mut codec = EnvelopeCodec::with_max_length(16);
        let mut buf = BytesMut::from(&b"msg:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n"[..]);
        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::OversizedEnvelope(16))));
    }
}
