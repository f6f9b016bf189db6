//! TCP front end for the sync gateway.
//!
//! Each accepted connection gets its own task that reads framed envelopes and
//! writes framed replies until the peer hangs up or shutdown is signalled.

use guildhall_core::SyncGateway;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

pub struct GatewayServer {
    gateway: Arc<SyncGateway>,
    shutdown_sender: broadcast::Sender<()>,
}

impl GatewayServer {
    pub fn new(gateway: Arc<SyncGateway>) -> Self {
        let (shutdown_sender, _) = broadcast::channel(1);
        Self {
            gateway,
            shutdown_sender,
        }
    }

    /// Handle used to stop the accept loop and every open connection.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_sender.clone()
    }

    /// Binds `addr` and serves until shutdown is signalled.
    pub async fn start(&self, addr: SocketAddr) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.run(listener).await
    }

    /// Serves on an already bound listener until shutdown is signalled.
    pub async fn run(&self, listener: TcpListener) -> std::io::Result<()> {
        info!("🌐 Sync gateway listening on {}", listener.local_addr()?);
        let mut shutdown_receiver = self.shutdown_sender.subscribe();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let gateway = self.gateway.clone();
                        let shutdown = self.shutdown_sender.subscribe();
                        tokio::spawn(async move {
                            handle_connection(gateway, stream, peer, shutdown).await;
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
                _ = shutdown_receiver.recv() => {
                    info!("🛑 Sync gateway stopped accepting connections");
                    break;
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection(
    gateway: Arc<SyncGateway>,
    mut stream: TcpStream,
    peer: SocketAddr,
    mut shutdown: broadcast::Receiver<()>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Could not disable Nagle for {}: {}", peer, e);
    }
    let peer_name = peer.to_string();
    info!("🔗 Sync peer connected: {}", peer_name);

    tokio::select! {
        served = gateway.serve(&mut stream, &peer_name) => match served {
            Ok(answered) => {
                debug!("Sync connection {} finished after {} requests", peer_name, answered);
            }
            Err(e) => {
                error!("Sync connection {} failed: {}", peer_name, e);
            }
        },
        _ = shutdown.recv() => {
            debug!("Closing sync connection {} for shutdown", peer_name);
        }
    }
}
