//! Target selection with round-robin and failover.
//!
//! Every new connection advances a shared counter to pick its starting
//! target. From there the targets are tried in configured order, wrapping
//! around, until one accepts. Each target is tried at most once per
//! connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::ForwardError;

/// Default connect timeout for target connections.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Round-robin target selector shared by all connections.
#[derive(Debug)]
pub struct TargetSelector {
    /// Targets in round-robin order.
    targets: Vec<SocketAddr>,
    /// Round-robin counter.
    rr_counter: AtomicUsize,
    /// Connect timeout per dial attempt.
    connect_timeout: Duration,
    /// Total selections attempted.
    connections_attempted: AtomicU64,
    /// Total selections that produced a connection.
    connections_succeeded: AtomicU64,
    /// Individual dial attempts that failed.
    dial_failures: AtomicU64,
}

impl TargetSelector {
    /// Create a selector over a fixed target list.
    pub fn new(targets: Vec<SocketAddr>) -> Self {
        Self::with_timeout(targets, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Create a selector with a custom connect timeout.
    pub fn with_timeout(targets: Vec<SocketAddr>, connect_timeout: Duration) -> Self {
        Self {
            targets,
            rr_counter: AtomicUsize::new(0),
            connect_timeout,
            connections_attempted: AtomicU64::new(0),
            connections_succeeded: AtomicU64::new(0),
            dial_failures: AtomicU64::new(0),
        }
    }

    pub fn targets(&self) -> &[SocketAddr] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Pick a starting target and connect, failing over to the following
    /// targets in order.
    ///
    /// Returns the connected stream and the address it was dialed at.
    pub async fn select_and_connect(&self) -> Result<(TcpStream, SocketAddr), ForwardError> {
        self.connections_attempted.fetch_add(1, Ordering::Relaxed);

        let count = self.targets.len();
        if count == 0 {
            return Err(ForwardError::NoTargetReachable { attempted: 0 });
        }

        // The counter is advanced before use, so the first connection starts
        // at the second target. Wraps on overflow; the modulo keeps the index
        // in range.
        let start = self
            .rr_counter
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(1)
            % count;

        for (attempt, target) in self.candidates(start).enumerate() {
            match self.try_connect(target).await {
                Ok(stream) => {
                    self.connections_succeeded.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        target_addr = %target,
                        failed_before = attempt,
                        "Connected to target"
                    );
                    return Ok((stream, target));
                }
                Err(e) => {
                    self.dial_failures.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        target_addr = %target,
                        error = %e,
                        "Could not connect to target"
                    );
                }
            }
        }

        Err(ForwardError::NoTargetReachable { attempted: count })
    }

    /// Targets in the order they are tried for a given start offset.
    fn candidates(&self, start: usize) -> impl Iterator<Item = SocketAddr> + '_ {
        let count = self.targets.len();
        (0..count).map(move |n| self.targets[(start + n) % count])
    }

    /// Attempt to connect to a single target.
    async fn try_connect(&self, addr: SocketAddr) -> std::io::Result<TcpStream> {
        match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(result) => result,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "connect timeout",
            )),
        }
    }

    /// Get selection statistics.
    pub fn stats(&self) -> SelectorStats {
        SelectorStats {
            connections_attempted: self.connections_attempted.load(Ordering::Relaxed),
            connections_succeeded: self.connections_succeeded.load(Ordering::Relaxed),
            dial_failures: self.dial_failures.load(Ordering::Relaxed),
        }
    }
}

/// Statistics for a target selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectorStats {
    pub connections_attempted: u64,
    pub connections_succeeded: u64,
    pub dial_failures: u64,
}
