//! TCP forwarding engine.
//!
//! This module provides:
//! - Round-robin target selection with failover
//! - Per-connection bidirectional byte pumping
//! - Listener accept loops
//! - Visibility-gated lifecycle events
//!
//! ## Architecture
//!
//! ```text
//! Client -> Listener -> Forwarder -> TargetSelector -> Target
//!                          |
//!              two pumps, first to stop closes both sockets
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use proxy::{DisplayFlags, Forwarder, Listener, TargetSelector};
//!
//! let selector = Arc::new(TargetSelector::new(vec!["127.0.0.1:9100".parse()?]));
//! let forwarder = Arc::new(Forwarder::new(selector, DisplayFlags::default()));
//! let listener = Arc::new(Listener::bind("127.0.0.1:9000".parse()?, forwarder).await?);
//! listener.run(shutdown_rx).await?;
//! ```

mod listener;
mod selector;
mod tunnel;
mod visibility;

pub use listener::{Listener, ListenerStats};
pub use selector::{SelectorStats, TargetSelector, DEFAULT_CONNECT_TIMEOUT};
pub use tunnel::{Forwarder, TunnelEnd, TunnelReport, PUMP_BUFFER_SIZE};
pub use visibility::{format_size, DisplayFlags, Visibility};
