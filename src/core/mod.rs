//! # Core Wire Components
//!
//! Envelope model and line framing.
//!
//! This module provides the foundation for the protocol: the flat key-value
//! envelope, its classification into protocol frames, and the codec that moves
//! envelopes over byte streams one line at a time.
//!
//! ## Components
//! - **Envelope**: typed optional fields plus the raw `parse`/`serialize` pair
//! - **Frame**: an envelope checked to carry exactly one protocol meaning
//! - **Codec**: Tokio codec for newline framing with a line-length limit
//!
//! ## Wire Format
//! ```text
//! key:value|key:value|...\n
//! ```
//!
//! ## Limitations
//! - `|` and `:` are not escaped; values must not contain `|`
//! - Maximum line length is bounded (8 KB by default) to prevent memory exhaustion

pub mod codec;
pub mod envelope;
