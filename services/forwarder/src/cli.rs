//! Command-line interface.

use std::time::Duration;

use clap::Parser;

use crate::config::{self, Config, LogFormat, Role, Verbosity};
use crate::error::ConfigError;
use crate::proxy::DisplayFlags;

/// Forward TCP connections from local endpoints to a set of targets.
///
/// Each new connection goes to the next target in round-robin order; targets
/// that refuse are skipped in favour of the following one.
#[derive(Debug, Parser)]
#[command(name = "tcpfwd")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "Example: tcpfwd -s localhost:123,0.0.0.0:234,345 -t 1234:5678:9abc::1:123")]
pub struct Cli {
    /// Local endpoints to listen at ([ipaddress]:port, [dnsname]:port or port),
    /// comma-separated.
    #[arg(short, long = "source", value_name = "ENDPOINTS", env = "TCPFWD_SOURCE")]
    pub sources: Vec<String>,

    /// Target endpoints connections are forwarded to, comma-separated.
    ///
    /// Defaults to the loopback address on each source port.
    #[arg(short, long = "target", value_name = "ENDPOINTS", env = "TCPFWD_TARGET")]
    pub targets: Vec<String>,

    /// Display debug and verbose messages.
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only display warnings and errors.
    #[arg(short, long)]
    pub quiet: bool,

    /// Display each connect and disconnect.
    #[arg(long = "show-connects", visible_alias = "sc")]
    pub show_connects: bool,

    /// Display byte statistics after each connection has been closed.
    #[arg(long = "show-statistics", visible_alias = "st")]
    pub show_statistics: bool,

    /// Connect timeout per target attempt, in milliseconds.
    #[arg(long, value_name = "MS", default_value_t = 2000, env = "TCPFWD_CONNECT_TIMEOUT_MS")]
    pub connect_timeout_ms: u64,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "TCPFWD_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Do not watch the terminal for the Escape shutdown key.
    #[arg(long)]
    pub no_console: bool,
}

impl Cli {
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else if self.verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }

    /// Resolve endpoints and build a validated configuration.
    pub async fn into_config(self) -> Result<Config, ConfigError> {
        let verbosity = self.verbosity();

        let sources = config::resolve_endpoints(&self.sources, Role::Source).await?;
        if sources.is_empty() {
            return Err(ConfigError::NoSource);
        }

        let targets = if self.targets.is_empty() {
            config::default_targets(&sources)
        } else {
            config::resolve_endpoints(&self.targets, Role::Target).await?
        };

        let config = Config {
            sources,
            targets,
            display: DisplayFlags {
                show_connects: self.show_connects,
                show_statistics: self.show_statistics,
            },
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            verbosity,
            log_format: self.log_format,
            console: !self.no_console,
        };
        config.validate()?;
        Ok(config)
    }
}
