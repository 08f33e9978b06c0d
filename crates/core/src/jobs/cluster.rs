//! Cross-instance completion notifications over TCP.
//!
//! Each gateway instance listens on a configured address and fans every
//! locally published ticket out to its peers as a newline-delimited frame.
//! Tickets received from peers feed the local in-memory channel, so
//! subscribers never care which instance finished the job. Peer delivery
//! is best-effort with retries; the job store remains the source of truth.

use crate::jobs::channel::{
    ChannelError, InMemoryNotificationChannel, NotificationChannel, TicketSubscription,
};
use anyhow::Context;
use async_trait::async_trait;
use meridian_common::config::{ClusterSettings, RetrySettings};
use meridian_common::retry::retry_async;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct ClusterNotificationChannel {
    local: Arc<InMemoryNotificationChannel>,
    peers: Vec<String>,
    retry: RetrySettings,
    shutdown: CancellationToken,
}

impl ClusterNotificationChannel {
    pub fn new(settings: &ClusterSettings, retry: RetrySettings) -> Self {
        Self {
            local: Arc::new(InMemoryNotificationChannel::default()),
            peers: settings.peers.clone(),
            retry,
            shutdown: CancellationToken::new(),
        }
    }

    /// Bind the listener and start accepting peer notifications. Returns
    /// the bound address; runs until [`NotificationChannel::close`].
    pub async fn start(&self, listen_addr: &str) -> anyhow::Result<SocketAddr> {
        let listener = TcpListener::bind(listen_addr).await.context(format!(
            "Failed to bind notification listener on {}",
            listen_addr
        ))?;
        let bound = listener
            .local_addr()
            .context("Failed to resolve bound listener address")?;
        info!(target: "jobs", addr = %bound, "cluster notification listener started");

        let local = self.local.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!(target: "jobs", "notification listener shutting down");
                        break;
                    }
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                let local = local.clone();
                                let shutdown = shutdown.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = relay_peer(stream, &local, shutdown).await {
                                        warn!(
                                            target: "jobs",
                                            peer = %peer,
                                            error = %e,
                                            "peer notification stream failed"
                                        );
                                    }
                                });
                            }
                            Err(e) => {
                                warn!(target: "jobs", error = %e, "accept failed");
                            }
                        }
                    }
                }
            }
        });
        Ok(bound)
    }

    /// Fire-and-forget delivery to each peer. Publish must not wait on
    /// peer connectivity, so every peer gets its own retrying task.
    fn fan_out(&self, ticket: &str) {
        for peer in &self.peers {
            let peer = peer.clone();
            let ticket = ticket.to_string();
            let retry = self.retry;
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                let result = tokio::select! {
                    _ = shutdown.cancelled() => return,
                    result = retry_async("peer_notify", retry, || async {
                        send_frame(&peer, &ticket).await
                    }) => result,
                };
                if let Err(e) = result {
                    // The peer can still find the result in the job store;
                    // its long-pollers time out instead of hanging.
                    warn!(target: "jobs", peer, ticket, error = %e, "peer notification dropped");
                }
            });
        }
    }
}

async fn send_frame(peer: &str, ticket: &str) -> std::io::Result<()> {
    let mut stream = TcpStream::connect(peer).await?;
    stream.write_all(ticket.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.flush().await?;
    Ok(())
}

async fn relay_peer(
    stream: TcpStream,
    local: &InMemoryNotificationChannel,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let mut lines = BufReader::new(stream).lines();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            line = lines.next_line() => {
                match line? {
                    None => return Ok(()),
                    Some(ticket) => {
                        let ticket = ticket.trim();
                        if ticket.is_empty() {
                            continue;
                        }
                        debug!(target: "jobs", ticket, "received peer notification");
                        if let Err(e) = local.publish(ticket).await {
                            warn!(target: "jobs", ticket, error = %e, "local relay failed");
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl NotificationChannel for ClusterNotificationChannel {
    async fn publish(&self, ticket: &str) -> Result<(), ChannelError> {
        self.local.publish(ticket).await?;
        self.fan_out(ticket);
        Ok(())
    }

    async fn subscribe(&self) -> TicketSubscription {
        self.local.subscribe().await
    }

    async fn close(&self) {
        self.shutdown.cancel();
        self.local.close().await;
    }
}
