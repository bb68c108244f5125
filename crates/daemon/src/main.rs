//! prussd
//!
//! Privilege broker for the PRU subsystem.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use prussd::config::{Config, DEFAULT_CONFIG_PATH};
use prussd::ipc::{PrussClient, PrussServer};
use prussd::protocol::{Command, Response};
use prussd::Dispatcher;

/// prussd - brokers PRU remoteproc and rpmsg access for unprivileged clients.
#[derive(Parser, Debug)]
#[command(name = "prussd")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the daemon until SIGTERM or SIGINT
    Start {
        /// Socket path to listen on (overrides configuration)
        #[arg(long, short, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Send one request to a running daemon and print the response
    Send {
        /// Request tokens, e.g. `STATE_0` or `SENDMSG rpmsg_pru 30 hello`
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        tokens: Vec<String>,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let mut config = Config::load(&config_path);

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Initialize tracing
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.daemon.log_level.to_lowercase()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::debug!("Using config file: {:?}", config_path);

    match cli.command {
        Commands::Start { socket } => {
            if let Some(socket) = socket {
                config.daemon.socket_path = socket;
            }
            config.validate()?;
            run_daemon(config).await?;
        }
        Commands::Send { tokens } => {
            let response = send_request(&config, &tokens.join(" ")).await?;

            let rendered = response.to_string();
            if rendered.ends_with('\n') {
                print!("{}", rendered);
            } else {
                println!("{}", rendered);
            }

            if response.is_error() {
                std::process::exit(1);
            }
        }
        Commands::Config => {
            config.validate()?;
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

/// Serve requests until a shutdown signal arrives, then remove the socket.
async fn run_daemon(config: Config) -> anyhow::Result<()> {
    tracing::info!("prussd starting...");

    let socket_path = config.daemon.socket_path.clone();
    let dispatcher = Arc::new(Dispatcher::new(&config));
    let server = PrussServer::bind(&socket_path)
        .await
        .with_context(|| format!("Failed to bind socket {}", socket_path.display()))?;

    let result = tokio::select! {
        result = server.serve(dispatcher) => result.context("Server stopped accepting connections"),
        signal = wait_for_shutdown_signal() => signal,
    };

    drop(server);
    if let Err(e) = std::fs::remove_file(&socket_path) {
        tracing::warn!("Failed to remove socket {}: {}", socket_path.display(), e);
    }

    tracing::info!("prussd stopped");
    result
}

/// Send `line` through the client library.
///
/// Lines that parse as a command get the command's timeout policy; anything
/// else is passed through verbatim so the daemon's verdict is shown.
async fn send_request(config: &Config, line: &str) -> anyhow::Result<Response> {
    let client = PrussClient::new(&config.daemon.socket_path);

    let response = match Command::parse(line) {
        Ok(command) => client.request(&command).await,
        Err(_) => client.request_line(line).await,
    };

    response.with_context(|| {
        format!(
            "Cannot talk to daemon at {}",
            config.daemon.socket_path.display()
        )
    })
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }

    Ok(())
}
