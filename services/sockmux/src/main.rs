//! sockmux
//!
//! Per-uid Unix domain socket router.
//!
//! This service:
//! - Accepts client connections on the master socket
//! - Identifies each client by the uid in its kernel peer credentials
//! - Connects it to a randomly chosen live backend registered for that uid
//! - Relays bytes both ways until either side closes
//! - Accepts ADD/DELETE/LIST/QUIT commands on the control socket

use anyhow::Result;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sockmux::{Cli, Server, ShutdownSignal};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version go to stdout and exit 0; usage errors go to
            // stderr and exit 1.
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    // Initialize tracing (prefer RUST_LOG, fallback to --log-level)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| cli.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = cli.server_config();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        control_socket = %config.control_socket_path.display(),
        master_socket = %config.master_socket_path.display(),
        "Configuration loaded"
    );

    let shutdown = ShutdownSignal::new();
    let server = Server::new(config, shutdown.clone());

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            tokio::select! {
                _ = sigint.recv() => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = shutdown.triggered() => return,
            }
            shutdown.trigger();
        }
    });

    // Returns once both accept loops have exited. Connection tasks still in
    // flight are dropped with the runtime.
    server.run().await;

    Ok(())
}
