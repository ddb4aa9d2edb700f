//! # chat-relay
//!
//! Relay-mediated pairing and quota-bounded text messaging.
//!
//! Two named participants connect to a relay, register an identifier, pair
//! with each other through the relay and exchange a bounded number of text
//! messages without ever connecting directly.
//!
//! ## Modules
//! - [`core`]: the `key:value|key:value` envelope and its line codec
//! - [`session`]: participant state, the registry and connection workers
//! - [`protocol`]: handshake, pairing, relay and frame dispatch
//! - [`transport`]: the TCP acceptor
//! - [`service`]: the participant-side client
//! - [`config`], [`error`], [`utils`]: configuration, errors, logging,
//!   metrics and timeouts
//!
//! ## Example
//! ```no_run
//! use chat_relay::config::RelayConfig;
//! use chat_relay::service::RelayClient;
//!
//! # async fn run() -> chat_relay::error::Result<()> {
//! let config = RelayConfig::default();
//! let mut client = RelayClient::connect(&config.client.address, config.client.clone()).await?;
//! client.register("alice").await?;
//! client.request_pairing("bob").await?;
//! let peer = client.await_pairing().await?;
//! client.send_message(&format!("hello {peer}")).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod session;
pub mod transport;
pub mod utils;

pub use config::RelayConfig;
pub use error::{ProtocolError, Result};
