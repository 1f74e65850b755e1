//! Server: two listeners, two accept loops, one task per connection.
//!
//! - Master endpoint: resolve the peer uid, select a backend for it, relay
//! - Control endpoint: resolve the peer uid, serve control commands
//!
//! Each endpoint binds independently. A bind failure is logged and ends that
//! endpoint's loop only; the other endpoint keeps serving. [`Server::run`]
//! returns once both loops have exited, which happens on shutdown. It does not
//! wait for connection tasks.

use std::sync::Arc;

use tokio::net::UnixStream;
use tracing::{debug, error, info, warn, Span};

use crate::config::ServerConfig;
use crate::control::ControlProtocol;
use crate::error::MuxError;
use crate::proxy::{couple, credentials, BackendSelector, Listener, RoutingTable};
use crate::shutdown::ShutdownSignal;

/// The socket multiplexer.
pub struct Server {
    config: ServerConfig,
    table: Arc<RoutingTable>,
    selector: Arc<BackendSelector>,
    control: ControlProtocol,
    shutdown: ShutdownSignal,
}

impl Server {
    /// Create a server with an empty routing table.
    pub fn new(config: ServerConfig, shutdown: ShutdownSignal) -> Self {
        let table = Arc::new(RoutingTable::new());
        Self {
            selector: Arc::new(BackendSelector::new(Arc::clone(&table))),
            control: ControlProtocol::new(Arc::clone(&table), shutdown.clone()),
            table,
            config,
            shutdown,
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The routing table shared by both endpoints.
    pub fn routing_table(&self) -> Arc<RoutingTable> {
        Arc::clone(&self.table)
    }

    /// The backend selector used by the master endpoint.
    pub fn selector(&self) -> Arc<BackendSelector> {
        Arc::clone(&self.selector)
    }

    /// Run both accept loops until shutdown.
    pub async fn run(&self) {
        info!(
            master = %self.config.master_socket_path.display(),
            control = %self.config.control_socket_path.display(),
            "Starting socket multiplexer"
        );

        tokio::join!(self.run_master(), self.run_control());

        info!("Socket multiplexer stopped");
    }

    async fn run_master(&self) {
        let listener = match Listener::bind(
            "master",
            &self.config.master_socket_path,
            self.config.socket_mode,
        ) {
            Ok(listener) => listener,
            Err(e) => {
                error!(endpoint = "master", error = %e, "Failed to bind listener");
                return;
            }
        };

        let selector = Arc::clone(&self.selector);
        listener
            .run(self.shutdown.clone(), move |stream| {
                handle_master(Arc::clone(&selector), stream)
            })
            .await;
    }

    async fn run_control(&self) {
        let listener = match Listener::bind(
            "control",
            &self.config.control_socket_path,
            self.config.socket_mode,
        ) {
            Ok(listener) => listener,
            Err(e) => {
                error!(endpoint = "control", error = %e, "Failed to bind listener");
                return;
            }
        };

        let control = self.control.clone();
        listener
            .run(self.shutdown.clone(), move |stream| {
                handle_control(control.clone(), stream)
            })
            .await;
    }
}

/// Route one master connection to a backend and relay until either side closes.
async fn handle_master(selector: Arc<BackendSelector>, client: UnixStream) {
    let creds = match credentials::resolve(&client).await {
        Ok(creds) => creds,
        Err(e) => {
            let e = MuxError::from(e);
            warn!(reason = e.reason_code(), error = %e, "Rejecting connection");
            return;
        }
    };
    Span::current().record("uid", creds.uid);
    debug!(pid = creds.pid, gid = creds.gid, "Peer credentials resolved");

    let (backend, addr) = match selector.select_backend(creds.uid).await {
        Ok(selected) => selected,
        Err(e) => {
            debug!(reason = e.reason_code(), "Closing connection without relay");
            return;
        }
    };

    let stats = couple(client, backend).await;
    debug!(
        backend = %addr,
        bytes_to_backend = stats.bytes_to_backend,
        bytes_from_backend = stats.bytes_from_backend,
        end = ?stats.end,
        "Relay finished"
    );
}

/// Serve control commands for one connection until the peer closes.
async fn handle_control(control: ControlProtocol, stream: UnixStream) {
    let creds = match credentials::resolve(&stream).await {
        Ok(creds) => creds,
        Err(e) => {
            let e = MuxError::from(e);
            warn!(reason = e.reason_code(), error = %e, "Rejecting connection");
            return;
        }
    };
    Span::current().record("uid", creds.uid);

    match control.serve(creds.uid, stream).await {
        Ok(handled) => debug!(commands = handled, "Control session closed"),
        Err(e) => warn!(error = %e, "Control session failed"),
    }
}
