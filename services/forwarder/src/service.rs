//! Forwarder service.
//!
//! Owns one listener per local endpoint and the shutdown flag they observe.
//! Shutdown stops the accept loops; tunnels already running finish on their
//! own.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::Config;
use crate::error::ConfigError;
use crate::proxy::{Forwarder, Listener, ListenerStats, TargetSelector};

/// Cloneable handle used to request shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Request shutdown. Idempotent.
    pub fn request(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_requested(&self) -> bool {
        *self.tx.borrow()
    }
}

/// A listener running on its own task.
struct RunningListener {
    local_addr: SocketAddr,
    stats: Arc<ListenerStats>,
    handle: JoinHandle<io::Result<()>>,
}

/// The running forwarder.
pub struct ForwarderService {
    listeners: Vec<RunningListener>,
    selector: Arc<TargetSelector>,
    shutdown: ShutdownHandle,
    shutdown_rx: watch::Receiver<bool>,
}

impl ForwarderService {
    /// Bind every local endpoint and start accepting.
    ///
    /// Fails without starting anything if the configuration is invalid or any
    /// endpoint cannot be bound.
    pub async fn start(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;

        let selector = Arc::new(TargetSelector::with_timeout(
            config.targets.clone(),
            config.connect_timeout,
        ));
        let forwarder = Arc::new(Forwarder::new(Arc::clone(&selector), config.display));

        let mut bound = Vec::with_capacity(config.sources.len());
        for &addr in &config.sources {
            let listener = Listener::bind(addr, Arc::clone(&forwarder))
                .await
                .map_err(|source| ConfigError::Bind { addr, source })?;
            let local_addr = listener
                .local_addr()
                .map_err(|source| ConfigError::Bind { addr, source })?;
            info!(bind_addr = %local_addr, "Listening at {}", local_addr);
            bound.push((local_addr, Arc::new(listener)));
        }

        for target in selector.targets() {
            info!(target_addr = %target, "Target {} configured", target);
        }

        let (tx, shutdown_rx) = watch::channel(false);
        let shutdown = ShutdownHandle { tx: Arc::new(tx) };

        let listeners = bound
            .into_iter()
            .map(|(local_addr, listener)| {
                let stats = Arc::clone(listener.stats());
                let handle = tokio::spawn(listener.run(shutdown_rx.clone()));
                RunningListener {
                    local_addr,
                    stats,
                    handle,
                }
            })
            .collect();

        Ok(Self {
            listeners,
            selector,
            shutdown,
            shutdown_rx,
        })
    }

    /// Addresses the listeners are bound to, in configuration order.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.iter().map(|l| l.local_addr).collect()
    }

    /// Per-listener statistics, in configuration order.
    pub fn listener_stats(&self) -> Vec<Arc<ListenerStats>> {
        self.listeners.iter().map(|l| Arc::clone(&l.stats)).collect()
    }

    pub fn selector(&self) -> &Arc<TargetSelector> {
        &self.selector
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Resolve once shutdown has been requested.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_rx.clone();
        // The sender lives in `self`, so this only errors if it was dropped.
        let _ = rx.wait_for(|requested| *requested).await;
    }

    /// Stop accepting on every listener and wait for the accept loops to end.
    pub async fn shutdown(self) {
        self.shutdown.request();
        for listener in self.listeners {
            match listener.handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(
                    bind_addr = %listener.local_addr,
                    error = %e,
                    "Listener error"
                ),
                Err(e) => error!(
                    bind_addr = %listener.local_addr,
                    error = %e,
                    "Listener task failed"
                ),
            }
        }
        info!("All listeners stopped");
    }
}
