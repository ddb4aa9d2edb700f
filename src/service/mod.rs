//! # Participant Services
//!
//! The participant-side half of the protocol: connecting, registering,
//! pairing and chatting through a relay.
//!
//! ## Components
//! - **Client**: owns the connection and drives handshake and pairing
//! - **Chat**: sending and receiving halves of a paired connection

pub mod chat;
pub mod client;

pub use chat::{ChatEvent, ChatInbox, ChatSender, IncomingMessage};
pub use client::RelayClient;
