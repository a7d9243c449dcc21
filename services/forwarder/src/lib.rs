//! tcpfwd
//!
//! Multi-listener TCP port forwarder. Connections accepted on any local
//! endpoint are relayed byte for byte to one of the configured targets,
//! picked round-robin with failover to the next target on connect failure.

pub mod cli;
pub mod config;
pub mod console;
pub mod error;
pub mod proxy;
pub mod service;

pub use config::{Config, LogFormat, Verbosity};
pub use error::{ConfigError, ForwardError};
pub use proxy::{
    DisplayFlags, Forwarder, Listener, ListenerStats, SelectorStats, TargetSelector, TunnelEnd,
    TunnelReport, Visibility,
};
pub use service::{ForwarderService, ShutdownHandle};
