//! # Transport Layer
//!
//! TCP acceptor for the relay server.
//!
//! The acceptor spawns one worker per connection and supports graceful
//! shutdown: on signal it stops accepting, tells every worker to finish, and
//! waits up to the configured shutdown timeout for them to drain.

pub mod tcp;

pub use tcp::{start_server, RelayServer};
