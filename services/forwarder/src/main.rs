//! tcpfwd
//!
//! Accepts TCP connections on the configured local endpoints and forwards
//! them to the configured targets until interrupted.

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use tcpfwd::cli::Cli;
use tcpfwd::console::{self, RawConsoleWriter};
use tcpfwd::{Config, ConfigError, ForwarderService, LogFormat, Verbosity};

/// Exit status for configuration errors.
const EXIT_CONFIG: i32 = 2;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match cli.into_config().await {
        Ok(config) => config,
        Err(e) => {
            print_config_error(&e);
            std::process::exit(EXIT_CONFIG);
        }
    };

    let use_console = config.console && console::is_interactive();
    init_tracing(&config, use_console);

    if config.verbosity != Verbosity::Quiet {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            "{} v{}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        );
    }
    info!(
        source_count = config.sources.len(),
        target_count = config.targets.len(),
        show_connects = config.display.show_connects,
        show_statistics = config.display.show_statistics,
        connect_timeout_ms = config.connect_timeout.as_millis() as u64,
        "Configuration loaded"
    );

    let service = match ForwarderService::start(&config).await {
        Ok(service) => service,
        Err(e) => {
            error!(error = %e, "Error during startup");
            print_config_error(&e);
            std::process::exit(EXIT_CONFIG);
        }
    };

    let shutdown = service.shutdown_handle();
    let console_handle = use_console.then(|| console::spawn_watcher(shutdown.clone()));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            shutdown.request();
        }
        _ = service.wait_for_shutdown() => {}
    }

    service.shutdown().await;

    if let Some(handle) = console_handle {
        let _ = handle.await;
    }

    info!("Forwarder shutdown complete");
    Ok(())
}

/// Initialize tracing (prefer RUST_LOG, fallback to the verbosity flags).
fn init_tracing(config: &Config, raw_console: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.verbosity.default_filter().into());

    let layer = match (config.log_format, raw_console) {
        (LogFormat::Json, _) => tracing_subscriber::fmt::layer().json().boxed(),
        (LogFormat::Text, true) => tracing_subscriber::fmt::layer()
            .with_writer(|| RawConsoleWriter)
            .boxed(),
        (LogFormat::Text, false) => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry().with(filter).with(layer).init();
}

/// Print a startup error with usage guidance.
fn print_config_error(err: &ConfigError) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    let hint = match err {
        ConfigError::NoSource => Some("Hint: pass at least one local endpoint with -s/--source."),
        ConfigError::NoTarget => Some("Hint: pass target endpoints with -t/--target."),
        ConfigError::InvalidEndpoint { .. } | ConfigError::Resolve { .. } => {
            Some("Hint: endpoints are [ipaddress]:port, [dnsname]:port or a bare port.")
        }
        ConfigError::Bind { .. } => Some("Hint: is another process already listening there?"),
        ConfigError::InvalidOption(_) => None,
    };
    if let Some(hint) = hint {
        eprintln!("\n{}", hint.yellow());
    }
    eprintln!("\nRun `tcpfwd --help` for usage.");
}
