//! # Session Protocol
//!
//! Registration, pairing and relay, the three exchanges a participant goes
//! through after connecting.
//!
//! ## Components
//! - **Handshake**: binds a connection to a unique identifier
//! - **Pairing**: request/confirm/reject negotiation between two participants
//! - **Relay**: quota-bounded forwarding of tagged chat messages
//! - **Dispatcher**: routes a registered session's frames to the above
//!
//! ## Flow
//! ```text
//! client                relay                 client
//!   |-- req:handshake --->|                      |
//!   |<-- id, stat ---------|                      |
//!   |-- req:msg, to:bob -->|-- req:msg, from -->  |
//!   |<-- stat:success -----|<-- stat:success -----|
//!   |-- msg:hi ----------->|-- msg:[1] hi ------->|
//! ```

pub mod dispatcher;
pub mod handshake;
pub mod pairing;
pub mod relay;
