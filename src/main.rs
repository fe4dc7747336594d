//! Runner — hosts handler units on a managed HTTP server.
//!
//! Usage:
//!   runner                                         # http://localhost:8080/, shutdown port 8005
//!   runner --base-uri http://0.0.0.0:9090/api/     # Custom base URI
//!   runner --port 9090 --context api               # Same, from parts
//!   runner --open-browser                          # Open the base URI once started
//!   runner --stop                                  # Stop the instance on the shutdown port

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use axum::{Json, Router, routing::get};
use clap::Parser;
use runner_protocol::{RunOutcome, ServerConfig, ShutdownConfig};
use runner_server::ManagedServer;
use runner_transport::{AxumEngine, HandlerUnit, ShutdownSignal, TcpShutdownSignal};
use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "runner", about = "Managed HTTP server runner")]
struct Cli {
    /// Base URI to serve (overrides --host/--port/--context)
    #[arg(long)]
    base_uri: Option<String>,

    /// Host name to bind
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Port to listen on (0 for OS-assigned)
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Context path the handlers are mounted under
    #[arg(long, default_value = "")]
    context: String,

    /// Open the base URI in a browser once started
    #[arg(long)]
    open_browser: bool,

    /// Port of the shutdown listener
    #[arg(long, default_value = "8005")]
    shutdown_port: u16,

    /// Neither stop a prior instance nor listen for shutdown requests
    #[arg(long)]
    no_shutdown_listener: bool,

    /// Shared secret for shutdown requests
    #[arg(long, default_value = runner_protocol::DEFAULT_SHUTDOWN_TOKEN)]
    shutdown_token: String,

    /// Seconds in-flight requests may run after shutdown begins
    #[arg(long, default_value = "30")]
    grace_period: u64,

    /// Seconds to wait for a prior instance to finish stopping. Keep it above
    /// that instance's grace period, or its port may still be held at bind time.
    #[arg(long, default_value = "45")]
    stop_timeout: u64,

    /// Ask the running instance to stop, then exit
    #[arg(long)]
    stop: bool,

    /// Enable verbose logging (includes per-request traces)
    #[arg(long)]
    verbose: bool,

    /// Write logs to a file (defaults to ~/.runner/logs/runner.log if no path given)
    #[arg(long, default_missing_value = "DEFAULT", num_args = 0..=1)]
    log_file: Option<String>,
}

/// Built-in unit reporting liveness at `<base>status`.
struct StatusUnit;

impl HandlerUnit for StatusUnit {
    fn name(&self) -> &str {
        "status"
    }

    fn routes(&self) -> Router {
        Router::new().route(
            "/status",
            get(|| async {
                Json(json!({
                    "status": "ok",
                    "version": env!("CARGO_PKG_VERSION"),
                }))
            }),
        )
    }
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let Some(log_file_arg) = cli.log_file.as_deref() else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return Ok(());
    };

    let log_path = if log_file_arg == "DEFAULT" {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".runner/logs/runner.log")
    } else {
        PathBuf::from(log_file_arg)
    };

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open log file {}", log_path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();

    eprintln!("Logging to {}", log_path.display());
    Ok(())
}

fn build_config(cli: &Cli) -> anyhow::Result<ServerConfig> {
    let config = match &cli.base_uri {
        Some(uri) => ServerConfig::new(uri)?,
        None => ServerConfig::from_parts(&cli.host, cli.port, &cli.context)?,
    };

    let shutdown = if cli.no_shutdown_listener {
        ShutdownConfig::disabled()
    } else {
        ShutdownConfig::default()
            .with_port(Some(cli.shutdown_port))
            .with_token(cli.shutdown_token.clone())
            .with_stop_timeout(Duration::from_secs(cli.stop_timeout))
    };

    Ok(config
        .with_open_browser(cli.open_browser)
        .with_shutdown(shutdown)
        .with_grace_period(Duration::from_secs(cli.grace_period)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    let config = build_config(&cli)?;
    if config.shutdown.is_enabled() && config.shutdown.stop_timeout <= config.grace_period {
        warn!(
            "--stop-timeout ({}s) does not exceed --grace-period ({}s); a prior instance may still hold the port when this one binds",
            cli.stop_timeout, cli.grace_period
        );
    }

    if cli.stop {
        let Some(address) = config.shutdown.address() else {
            anyhow::bail!("--stop needs a shutdown port");
        };
        if TcpShutdownSignal.request_shutdown(&config.shutdown).await {
            info!("Instance at {address} shut down");
            return Ok(());
        }
        error!("No instance acknowledged the shutdown request at {address}");
        std::process::exit(1);
    }

    println!();
    println!("  Base URI:   {}", config.base_uri());
    match config.shutdown.address() {
        Some(address) => println!("  Shutdown:   {address}"),
        None => println!("  Shutdown:   disabled (--no-shutdown-listener)"),
    }
    println!("  Grace:      {}s", cli.grace_period);
    println!();

    let engine = AxumEngine::new().with_request_tracing(cli.verbose);
    let server = ManagedServer::with_collaborators(config, engine, TcpShutdownSignal);
    server.register(StatusUnit)?;

    match server.start().await? {
        RunOutcome::Stopped => {
            println!("  Server stopped.");
            Ok(())
        }
        RunOutcome::Failed(e) => {
            eprintln!("  Server failed to start: {e}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("runner").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn default_config() {
        let config = build_config(&parse(&[])).unwrap();
        assert_eq!(config.base_uri().as_str(), "http://localhost:8080/");
        assert_eq!(config.shutdown.port, Some(8005));
        assert_eq!(config.shutdown.stop_timeout, Duration::from_secs(45));
        assert!(config.shutdown.stop_timeout > config.grace_period);
    }

    #[test]
    fn stop_timeout_flag_reaches_shutdown_config() {
        let cli = parse(&["--grace-period", "60", "--stop-timeout", "90"]);
        let config = build_config(&cli).unwrap();
        assert_eq!(config.grace_period, Duration::from_secs(60));
        assert_eq!(config.shutdown.stop_timeout, Duration::from_secs(90));
    }

    #[test]
    fn no_shutdown_listener_disables_the_channel() {
        let config = build_config(&parse(&["--no-shutdown-listener", "--port", "0"])).unwrap();
        assert!(!config.shutdown.is_enabled());
        assert_eq!(config.port(), 0);
    }
}
