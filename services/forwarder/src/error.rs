//! Error types for the forwarder.
//!
//! Configuration errors are fatal to startup. Forwarding errors are scoped to
//! a single connection and never leave the connection's task.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Startup configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No local endpoint to listen on.
    #[error("missing source option: at least one local endpoint is required")]
    NoSource,

    /// No target endpoint to forward to.
    #[error("missing target option: at least one target endpoint is required")]
    NoTarget,

    /// An endpoint string could not be parsed.
    #[error("invalid endpoint '{input}': {reason}")]
    InvalidEndpoint { input: String, reason: String },

    /// An endpoint host name could not be resolved.
    #[error("could not resolve '{input}': {source}")]
    Resolve {
        input: String,
        #[source]
        source: io::Error,
    },

    /// A local endpoint could not be bound.
    #[error("could not listen at {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// An option value is out of range or contradicts another option.
    #[error("invalid option: {0}")]
    InvalidOption(String),
}

impl ConfigError {
    pub(crate) fn invalid_endpoint(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

/// Per-connection forwarding errors.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// Every configured target refused or timed out.
    #[error("could not connect to any target ({attempted} attempted)")]
    NoTargetReachable { attempted: usize },
}
