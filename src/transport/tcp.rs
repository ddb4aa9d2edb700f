use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::config::RelayConfig;
use crate::error::Result;
use crate::session::registry::Registry;
use crate::session::worker::run_session;
use crate::utils::metrics::global_metrics;

/// TCP acceptor for the relay.
///
/// Each accepted connection gets its own worker task. A failing connection
/// only ever ends its own worker.
pub struct RelayServer {
    listener: TcpListener,
    config: Arc<RelayConfig>,
    registry: Registry,
}

impl RelayServer {
    /// Validate `config` and bind its server address
    #[instrument(skip(config), fields(address = %config.server.address))]
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        config.validate_strict()?;
        let listener = TcpListener::bind(&config.server.address).await?;
        let registry = Registry::new(config.server.max_participants);
        info!(address = %listener.local_addr()?, "Relay listening");

        Ok(Self {
            listener,
            config: Arc::new(config),
            registry,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle to the live participant directory
    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    /// Serve until CTRL+C
    pub async fn serve(self) -> Result<()> {
        // Create internal shutdown channel
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received CTRL+C signal, shutting down");
                let _ = shutdown_tx.send(()).await;
            }
        });

        self.serve_with_shutdown(shutdown_rx).await
    }

    /// Serve until a message arrives on `shutdown_rx` or its sender is dropped
    pub async fn serve_with_shutdown(self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let metrics = global_metrics();
        let (stop_tx, stop_rx) = watch::channel(false);
        let active_connections = Arc::new(Mutex::new(0u32));

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutting down relay. Waiting for connections to close...");
                    let _ = stop_tx.send(true);

                    let timeout = tokio::time::sleep(self.config.server.shutdown_timeout);
                    tokio::pin!(timeout);

                    loop {
                        tokio::select! {
                            _ = &mut timeout => {
                                warn!("Shutdown timeout reached, forcing exit");
                                break;
                            }
                            _ = tokio::time::sleep(Duration::from_millis(50)) => {
                                let connections = *active_connections.lock().await;
                                if connections == 0 {
                                    info!("All connections closed, shutting down");
                                    break;
                                }
                                debug!(connections, "Waiting for connections to close");
                            }
                        }
                    }

                    metrics.log_metrics();
                    return Ok(());
                }

                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            debug!(peer = %addr, "Connection accepted");
                            metrics.connection_established();

                            let active_connections = active_connections.clone();
                            {
                                let mut count = active_connections.lock().await;
                                *count += 1;
                            }

                            let registry = self.registry.clone();
                            let config = self.config.clone();
                            let stop_rx = stop_rx.clone();
                            tokio::spawn(async move {
                                if let Err(e) = run_session(stream, registry, config, stop_rx).await {
                                    debug!(peer = %addr, error = %e, "Connection ended with error");
                                }

                                metrics.connection_closed();
                                let mut count = active_connections.lock().await;
                                *count -= 1;
                                debug!(peer = %addr, "Connection closed");
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Error accepting connection");
                        }
                    }
                }
            }
        }
    }
}

/// Bind `config.server.address` and serve until CTRL+C
pub async fn start_server(config: RelayConfig) -> Result<()> {
    RelayServer::bind(config).await?.serve().await
}
