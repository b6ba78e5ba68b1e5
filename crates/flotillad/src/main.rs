//! flotillad — the Flotilla daemon.
//!
//! # Usage
//!
//! ```text
//! flotillad run --config /etc/flotilla/flotilla.toml --port 64000
//! flotillad check-config --config /etc/flotilla/flotilla.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info};

use flotillad::config::DaemonConfig;
use flotillad::daemon::{build_coordinator, refresh_loop};

#[derive(Parser)]
#[command(name = "flotillad", about = "Flotilla coordinator daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the coordinator and its REST API.
    Run {
        /// Path to flotilla.toml. Without one, a simulated fleet is used.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on; overrides `[http] port`.
        #[arg(long)]
        port: Option<u16>,

        #[arg(long, value_enum, default_value = "text")]
        log_format: LogFormat,
    },
    /// Parse a config file and report problems without starting.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            port,
            log_format,
        } => {
            init_tracing(log_format);
            let config = load_config(config)?;
            run(config, port).await
        }
        Command::CheckConfig { config } => {
            init_tracing(LogFormat::Text);
            let parsed = DaemonConfig::from_file(&config)?;
            println!(
                "{}: ok ({:?} provisioner, {:?} state, {} assignments)",
                config.display(),
                parsed.provisioner.kind,
                parsed.state.kind,
                parsed.repository.assignments.len()
            );
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,flotillad=debug,flotilla=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<DaemonConfig> {
    match path {
        Some(path) => {
            let config = DaemonConfig::from_file(&path)?;
            info!(path = %path.display(), "config loaded");
            Ok(config)
        }
        None => {
            info!("no config file given, using defaults");
            Ok(DaemonConfig::default())
        }
    }
}

async fn run(config: DaemonConfig, port: Option<u16>) -> anyhow::Result<()> {
    info!("Flotilla daemon starting");

    let refresh_interval = config.coordinator.refresh_interval()?;
    let coordinator = Arc::new(build_coordinator(&config)?);

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Background refresh ─────────────────────────────────────

    let refresh_handle = tokio::spawn(refresh_loop(
        coordinator.clone(),
        refresh_interval,
        shutdown_rx,
    ));

    // ── API server ─────────────────────────────────────────────

    let router = flotilla_api::build_router(coordinator);
    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(config.http.port)));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    let _ = refresh_handle.await;

    info!("Flotilla daemon stopped");
    Ok(())
}
