//! TCP listener and connection dispatch.
//!
//! Each listener owns one bound local endpoint. Accepted connections are
//! handed to the [`Forwarder`] on their own task so the accept loop never
//! waits on a tunnel.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, Instrument};

use super::tunnel::{Forwarder, TunnelEnd, TunnelReport};
use super::visibility::emit;

/// Pause after a failed accept before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Statistics for a listener.
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Total connections accepted.
    pub connections_accepted: AtomicU64,
    /// Connections currently being forwarded.
    pub connections_active: AtomicU64,
    /// Total connections closed.
    pub connections_closed: AtomicU64,
    /// Connections dropped because no target was reachable.
    pub target_failures: AtomicU64,
    /// Bytes forwarded from sources to targets.
    pub bytes_source_to_target: AtomicU64,
    /// Bytes forwarded from targets to sources.
    pub bytes_target_to_source: AtomicU64,
}

impl ListenerStats {
    fn record_closed(&self, report: &TunnelReport) {
        if report.end == TunnelEnd::NoTarget {
            self.target_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.bytes_source_to_target
            .fetch_add(report.source_to_target, Ordering::Relaxed);
        self.bytes_target_to_source
            .fetch_add(report.target_to_source, Ordering::Relaxed);
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }
}

/// A TCP listener for one local endpoint.
pub struct Listener {
    /// The bound socket.
    listener: TcpListener,
    /// Runs tunnels for accepted connections.
    forwarder: Arc<Forwarder>,
    /// Statistics.
    stats: Arc<ListenerStats>,
}

impl Listener {
    /// Bind a new listener.
    pub async fn bind(addr: SocketAddr, forwarder: Arc<Forwarder>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;

        Ok(Self {
            listener,
            forwarder,
            stats: Arc::new(ListenerStats::default()),
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Get listener statistics.
    pub fn stats(&self) -> &Arc<ListenerStats> {
        &self.stats
    }

    /// Accept and dispatch connections until shutdown is signalled.
    ///
    /// Returns when the shutdown flag becomes `true` or its sender is
    /// dropped. Tunnels already running are left to finish on their own.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> io::Result<()> {
        let local_addr = self.listener.local_addr()?;
        info!(bind_addr = %local_addr, "Listener started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        emit!(
                            self.forwarder.display().connects(),
                            peer_addr = %peer_addr,
                            bind_addr = %local_addr,
                            "Connect from {}",
                            peer_addr
                        );

                        self.stats
                            .connections_accepted
                            .fetch_add(1, Ordering::Relaxed);
                        self.stats
                            .connections_active
                            .fetch_add(1, Ordering::Relaxed);

                        let forwarder = Arc::clone(&self.forwarder);
                        let stats = Arc::clone(&self.stats);

                        tokio::spawn(
                            async move {
                                let report = forwarder.forward(stream, peer_addr).await;
                                stats.record_closed(&report);
                            }
                            .instrument(tracing::info_span!("connection", peer = %peer_addr)),
                        );
                    }
                    Err(e) => {
                        error!(bind_addr = %local_addr, error = %e, "Accept error");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }

        info!(bind_addr = %local_addr, "Listener stopped");
        Ok(())
    }
}
