//! Example: a relay and two participants in one process
//!
//! Starts a relay on an ephemeral port, registers "alice" and "bob", pairs
//! them and exchanges a few messages until alice's quota runs out.
//!
//! Run with: `cargo run --example relay_chat`

#![allow(clippy::uninlined_format_args)]

use chat_relay::config::RelayConfig;
use chat_relay::service::{ChatEvent, RelayClient};
use chat_relay::transport::RelayServer;
use chat_relay::utils::logging::init_logging;
use chat_relay::ProtocolError;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = RelayConfig::default_with_overrides(|c| {
        c.server.address = "127.0.0.1:0".to_string();
        c.session.message_quota = 3;
    });
    init_logging(&config.logging)?;

    let server = RelayServer::bind(config.clone()).await?;
    let addr = server.local_addr()?.to_string();
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let relay = tokio::spawn(server.serve_with_shutdown(shutdown_rx));
    println!("Relay listening on {}", addr);

    let mut alice = RelayClient::connect(&addr, config.client.clone())
        .await?
        .with_message_quota(config.session.message_quota);
    alice.register("alice").await?;

    let bob = RelayClient::connect(&addr, config.client.clone()).await?;
    let bob_task = tokio::spawn(async move {
        let mut bob: RelayClient = bob;
        bob.register("bob").await?;
        let peer = bob.await_pairing().await?;
        println!("bob: paired with {}", peer);

        let (mut sender, inbox) = bob.into_split()?;
        let printer = inbox.on_incoming_message(|message| {
            println!("bob <- {}: {}", message.from, message.text);
        });
        sender.send_message("hi alice").await?;
        match printer.await {
            Ok(result) => result,
            Err(e) => Err(ProtocolError::Io(std::io::Error::other(e))),
        }
    });

    alice.request_pairing("bob").await?;
    let peer = alice.await_pairing().await?;
    println!("alice: paired with {}", peer);

    if let Some(ChatEvent::Message(message)) = alice.next_message().await? {
        println!("alice <- {}: {}", message.from, message.text);
    }

    for text in ["hello bob", "how are you?", "see you later", "one more?"] {
        match alice.send_message(text).await {
            Ok(sequence) => println!("alice -> bob [{}]: {}", sequence, text),
            Err(ProtocolError::QuotaExceeded(limit)) => {
                println!("alice: quota of {} messages spent", limit);
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    alice.close().await?;
    bob_task.await??;

    let _ = shutdown_tx.send(()).await;
    relay.await??;
    Ok(())
}
