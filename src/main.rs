use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, info};
use tokio::net::TcpListener;

use roomcast::api::{self, AppState};
use roomcast::config::{self, RelayConfig};
use roomcast::ws::Hub;

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[derive(Debug, Parser)]
#[command(author, version, about = "Roomcast - room-based WebSocket fan-out relay.")]
struct Cli {
    /// Override the config file path
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Host address to bind to (overrides config)
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on (overrides config)
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,
    /// Reduce output to only errors
    #[arg(short, long)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
    /// Enable debug logging (equivalent to -v)
    #[arg(long)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long)]
    trace: bool,
}

impl Cli {
    fn effective_log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else if self.trace {
            LevelFilter::Trace
        } else if self.debug {
            LevelFilter::Debug
        } else {
            match self.verbose {
                0 => LevelFilter::Info,
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.filter_level(cli.effective_log_level());
    builder.try_init().ok();

    let mut config = config::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    run_server(config)
}

#[tokio::main]
async fn run_server(config: RelayConfig) -> Result<()> {
    let hub = Hub::new();
    let state = AppState::new(hub.clone(), config.clone());
    let app = api::create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid listen address")?;

    let listener = TcpListener::bind(addr)
        .await
        .context("binding to address")?;

    info!("WebSocket relay listening on http://{addr}");

    let shutdown_signal = async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        info!("Shutdown signal received, draining rooms...");
        hub.shutdown().await;
        info!("Shutdown complete");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("running server")?;

    Ok(())
}
