//! Unix socket listener and accept loop.
//!
//! A listener owns one socket file for its lifetime:
//! - The path is unlinked before bind, so a stale file from a previous run
//!   does not block startup
//! - `SO_PASSCRED` is enabled so accepted connections carry peer credentials
//! - The file mode is set after bind
//! - The path is unlinked again when the accept loop exits
//!
//! Every accepted connection is handed to its own detached task. The set of
//! those tasks is unbounded and never joined: shutdown stops the accept loop
//! only, and in-flight connections run until their own close conditions.

use std::fs;
use std::future::Future;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sockmux_peercred::enable_passcred;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, Instrument};

use crate::error::{MuxError, MuxResult};
use crate::shutdown::ShutdownSignal;

/// Back-off after a failed accept.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Statistics for a listener.
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Total connections accepted.
    pub connections_accepted: AtomicU64,
    /// Connections whose task is still running.
    pub connections_active: AtomicU64,
    /// Connections whose task has finished.
    pub connections_closed: AtomicU64,
    /// Failed accept calls.
    pub accept_errors: AtomicU64,
}

/// A bound Unix socket listener.
pub struct Listener {
    /// Endpoint name used in logs and spans.
    name: &'static str,
    path: PathBuf,
    listener: UnixListener,
    stats: Arc<ListenerStats>,
}

impl Listener {
    /// Bind a listener at `path` with credential passing enabled.
    pub fn bind(name: &'static str, path: &Path, mode: u32) -> MuxResult<Self> {
        let bind_error = |source: io::Error| MuxError::Bind {
            path: path.to_path_buf(),
            source,
        };

        match fs::remove_file(path) {
            Ok(()) => debug!(endpoint = name, path = %path.display(), "Removed stale socket file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(bind_error(e)),
        }

        let listener = UnixListener::bind(path).map_err(bind_error)?;
        enable_passcred(&listener).map_err(|e| bind_error(io::Error::other(e)))?;
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(bind_error)?;

        info!(
            endpoint = name,
            path = %path.display(),
            mode = %format!("{:o}", mode),
            "Listener bound"
        );

        Ok(Self {
            name,
            path: path.to_path_buf(),
            listener,
            stats: Arc::new(ListenerStats::default()),
        })
    }

    /// Path of the socket file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get listener statistics.
    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    /// Accept connections until `shutdown` fires, spawning `handler` for each.
    ///
    /// On exit the listener is closed and its socket file unlinked, so later
    /// connects fail. Connection tasks already spawned keep running.
    pub async fn run<F, Fut>(self, shutdown: ShutdownSignal, handler: F)
    where
        F: Fn(UnixStream) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        info!(endpoint = self.name, path = %self.path.display(), "Listener started");
        let mut next_conn_id = 0u64;

        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                _ = shutdown.triggered() => break,
            };

            match accepted {
                Ok((stream, _addr)) => {
                    next_conn_id += 1;
                    self.stats
                        .connections_accepted
                        .fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .connections_active
                        .fetch_add(1, Ordering::Relaxed);

                    let stats = Arc::clone(&self.stats);
                    let task = handler(stream);

                    tokio::spawn(
                        async move {
                            task.await;
                            stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                            stats.connections_closed.fetch_add(1, Ordering::Relaxed);
                        }
                        .instrument(tracing::info_span!(
                            "connection",
                            endpoint = self.name,
                            conn = next_conn_id,
                            uid = tracing::field::Empty
                        )),
                    );
                }
                Err(e) => {
                    self.stats.accept_errors.fetch_add(1, Ordering::Relaxed);
                    error!(endpoint = self.name, error = %e, "Accept error");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }

        let Self {
            name, path, listener, ..
        } = self;
        drop(listener);
        if let Err(e) = fs::remove_file(&path) {
            debug!(endpoint = name, path = %path.display(), error = %e, "Socket file already gone");
        }
        info!(endpoint = name, "Listener stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_bind_replaces_stale_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stale.sock");
        fs::write(&path, b"leftover").unwrap();

        let listener = Listener::bind("test", &path, 0o777).unwrap();
        let mode = fs::metadata(listener.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o777);
    }

    #[tokio::test]
    async fn test_bind_missing_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("x.sock");

        match Listener::bind("test", &path, 0o777) {
            Err(MuxError::Bind { path: failed, .. }) => assert_eq!(failed, path),
            Err(other) => panic!("Expected Bind error, got {:?}", other),
            Ok(_) => panic!("Expected Bind error"),
        }
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("loop.sock");
        let listener = Listener::bind("test", &path, 0o777).unwrap();
        let stats = listener.stats();
        let shutdown = ShutdownSignal::new();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = tokio::spawn(listener.run(shutdown.clone(), move |stream| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(());
                drop(stream);
            }
        }));

        let mut client = UnixStream::connect(&path).await.unwrap();
        client.write_all(b"x").await.unwrap();
        rx.recv().await.unwrap();
        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("accept loop should exit")
            .unwrap();

        assert!(!path.exists());
        assert!(UnixStream::connect(&path).await.is_err());
    }
}
