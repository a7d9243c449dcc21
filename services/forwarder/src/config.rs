//! Forwarder configuration.
//!
//! Endpoint lists are comma-separated items of the form `host:port`,
//! `[v6]:port`, `v6:port`, a bare `port`, or a bare host (default port 80).
//! Host names are resolved at startup and may expand to several endpoints.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use clap::ValueEnum;
use tracing::debug;

use crate::error::ConfigError;
use crate::proxy::{DisplayFlags, DEFAULT_CONNECT_TIMEOUT};

/// Port used when an endpoint item names only a host.
pub const DEFAULT_PORT: u16 = 80;

/// Lower bound for the per-dial connect timeout.
pub const MIN_CONNECT_TIMEOUT: Duration = Duration::from_millis(50);

/// Which side of the forwarder an endpoint list configures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Local endpoints to listen on.
    Source,
    /// Endpoints to forward to.
    Target,
}

impl Role {
    /// Host used for items that only give a port.
    fn default_host(self) -> IpAddr {
        match self {
            Self::Source => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Self::Target => IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }
}

/// Host part of an endpoint item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Host {
    Ip(IpAddr),
    Name(String),
}

/// One parsed, not yet resolved, endpoint item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: Host,
    pub port: u16,
}

impl Endpoint {
    /// Parse a single endpoint item.
    pub fn parse(item: &str, role: Role) -> Result<Self, ConfigError> {
        let item = item.trim();
        if item.is_empty() {
            return Err(ConfigError::invalid_endpoint(item, "empty endpoint"));
        }

        let endpoint = if item.bytes().all(|b| b.is_ascii_digit()) {
            Self {
                host: Host::Ip(role.default_host()),
                port: parse_port(item, item)?,
            }
        } else if let Some(rest) = item.strip_prefix('[') {
            let (addr, after) = rest
                .split_once(']')
                .ok_or_else(|| ConfigError::invalid_endpoint(item, "missing ']'"))?;
            let ip: Ipv6Addr = addr
                .parse()
                .map_err(|_| ConfigError::invalid_endpoint(item, "invalid IPv6 address"))?;
            let port = match after {
                "" => DEFAULT_PORT,
                _ => {
                    let port = after
                        .strip_prefix(':')
                        .ok_or_else(|| ConfigError::invalid_endpoint(item, "expected ':' after ']'"))?;
                    parse_port(item, port)?
                }
            };
            Self {
                host: Host::Ip(IpAddr::V6(ip)),
                port,
            }
        } else if let Ok(ip) = item.parse::<Ipv4Addr>() {
            Self {
                host: Host::Ip(IpAddr::V4(ip)),
                port: DEFAULT_PORT,
            }
        } else if let Some((host, port)) = item.rsplit_once(':') {
            if host.contains(':') {
                parse_unbracketed_v6(item, host, port)?
            } else {
                Self {
                    host: parse_host(item, host)?,
                    port: parse_port(item, port)?,
                }
            }
        } else {
            Self {
                host: parse_host(item, item)?,
                port: DEFAULT_PORT,
            }
        };

        if role == Role::Target && endpoint.port == 0 {
            return Err(ConfigError::invalid_endpoint(
                item,
                "port 0 is not a valid target",
            ));
        }

        Ok(endpoint)
    }

    /// Resolve to socket addresses.
    pub async fn resolve(&self) -> Result<Vec<SocketAddr>, ConfigError> {
        match &self.host {
            Host::Ip(ip) => Ok(vec![SocketAddr::new(*ip, self.port)]),
            Host::Name(name) => {
                let addrs: Vec<SocketAddr> = tokio::net::lookup_host((name.as_str(), self.port))
                    .await
                    .map_err(|source| ConfigError::Resolve {
                        input: format!("{}:{}", name, self.port),
                        source,
                    })?
                    .collect();
                debug!(host = %name, port = self.port, resolved = addrs.len(), "Resolved endpoint");
                Ok(addrs)
            }
        }
    }
}

/// An IPv6 literal without brackets. The last group is taken as the port
/// when what precedes it is itself a valid address, otherwise the whole
/// item is the address and the default port applies.
fn parse_unbracketed_v6(item: &str, host: &str, port: &str) -> Result<Endpoint, ConfigError> {
    if let (Ok(ip), Ok(port)) = (host.parse::<Ipv6Addr>(), port.parse::<u16>()) {
        return Ok(Endpoint {
            host: Host::Ip(IpAddr::V6(ip)),
            port,
        });
    }
    let ip: Ipv6Addr = item
        .parse()
        .map_err(|_| ConfigError::invalid_endpoint(item, "invalid IPv6 address"))?;
    Ok(Endpoint {
        host: Host::Ip(IpAddr::V6(ip)),
        port: DEFAULT_PORT,
    })
}

fn parse_port(item: &str, port: &str) -> Result<u16, ConfigError> {
    port.parse()
        .map_err(|_| ConfigError::invalid_endpoint(item, format!("invalid port '{}'", port)))
}

fn parse_host(item: &str, host: &str) -> Result<Host, ConfigError> {
    if host.is_empty() {
        return Err(ConfigError::invalid_endpoint(item, "empty host"));
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(Host::Ip(ip));
    }
    let valid = host
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_');
    if !valid {
        return Err(ConfigError::invalid_endpoint(item, "invalid host name"));
    }
    Ok(Host::Name(host.to_string()))
}

/// Parse and resolve comma-separated endpoint lists, dropping duplicates
/// while keeping first-seen order.
pub async fn resolve_endpoints(
    lists: &[String],
    role: Role,
) -> Result<Vec<SocketAddr>, ConfigError> {
    let mut resolved = Vec::new();
    for item in lists.iter().flat_map(|list| list.split(',')) {
        if item.trim().is_empty() {
            continue;
        }
        let endpoint = Endpoint::parse(item, role)?;
        for addr in endpoint.resolve().await? {
            push_unique(&mut resolved, addr);
        }
    }
    Ok(resolved)
}

/// Loopback targets reusing each source's port.
pub fn default_targets(sources: &[SocketAddr]) -> Vec<SocketAddr> {
    let mut targets = Vec::new();
    for source in sources {
        push_unique(
            &mut targets,
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), source.port()),
        );
    }
    targets
}

fn push_unique(addrs: &mut Vec<SocketAddr>, addr: SocketAddr) {
    if !addrs.contains(&addr) {
        addrs.push(addr);
    }
}

/// Console logging verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Verbosity {
    /// Warnings and errors only, no banner.
    Quiet,
    #[default]
    Normal,
    /// Debug records, including hidden lifecycle events.
    Verbose,
}

impl Verbosity {
    /// Default filter directive when `RUST_LOG` is not set.
    pub fn default_filter(self) -> &'static str {
        match self {
            Self::Quiet => "warn",
            Self::Normal => "info",
            Self::Verbose => "debug",
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per record.
    Json,
}

/// Validated forwarder configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Local endpoints to listen on.
    pub sources: Vec<SocketAddr>,
    /// Targets in round-robin order.
    pub targets: Vec<SocketAddr>,
    /// Which lifecycle events are shown at the default level.
    pub display: DisplayFlags,
    /// Per-dial connect timeout.
    pub connect_timeout: Duration,
    pub verbosity: Verbosity,
    pub log_format: LogFormat,
    /// Watch the terminal for the double-Escape shutdown key.
    pub console: bool,
}

impl Config {
    /// Create a configuration with default options.
    pub fn new(sources: Vec<SocketAddr>, targets: Vec<SocketAddr>) -> Self {
        Self {
            sources,
            targets,
            display: DisplayFlags::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            verbosity: Verbosity::default(),
            log_format: LogFormat::default(),
            console: false,
        }
    }

    /// Check the configuration can be started.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::NoSource);
        }
        if self.targets.is_empty() {
            return Err(ConfigError::NoTarget);
        }
        if let Some(target) = self.targets.iter().find(|t| t.port() == 0) {
            return Err(ConfigError::invalid_endpoint(
                target.to_string(),
                "port 0 is not a valid target",
            ));
        }
        if self.connect_timeout < MIN_CONNECT_TIMEOUT {
            return Err(ConfigError::InvalidOption(format!(
                "connect timeout must be at least {}ms",
                MIN_CONNECT_TIMEOUT.as_millis()
            )));
        }
        Ok(())
    }
}
