//! Backend selection.
//!
//! Picks a live backend for an identity out of the routing table:
//! - Uniform random draw among the identity's registered addresses
//! - A candidate that refuses the connection is presumed stale and evicted
//!   permanently, then the draw is repeated over what is left
//! - A candidate whose accept queue is full is live: the connect is retried
//!   until the queue has room, and nothing is evicted
//! - The first successful connect wins and the set is left untouched
//!
//! The whole attempt sequence runs under the routing table lock, connect
//! included. A backend that is slow to refuse or slow to accept therefore
//! stalls every table operation for its duration. There is no connect timeout.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::IteratorRandom;
use tokio::net::UnixStream;
use tracing::{debug, info, warn};

use super::registry::{BackendAddress, RoutingTable, Uid};
use crate::error::{MuxError, MuxResult};

/// Delay between connect attempts on a backend whose accept queue is full.
const BUSY_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Selector statistics.
#[derive(Debug, Default)]
pub struct SelectorStats {
    /// Connect attempts, successful or not.
    pub attempts: AtomicU64,
    /// Selections that returned a connected backend.
    pub selected: AtomicU64,
    /// Candidates evicted after a failed connect.
    pub evicted: AtomicU64,
    /// Selections that found no reachable backend.
    pub unavailable: AtomicU64,
    /// Connect retries against a backend with a full accept queue.
    pub busy_retries: AtomicU64,
}

/// Selects and connects to a backend for a peer identity.
pub struct BackendSelector {
    table: Arc<RoutingTable>,
    stats: SelectorStats,
}

impl BackendSelector {
    /// Create a selector over a routing table.
    pub fn new(table: Arc<RoutingTable>) -> Self {
        Self {
            table,
            stats: SelectorStats::default(),
        }
    }

    /// The routing table this selector draws from.
    pub fn table(&self) -> &Arc<RoutingTable> {
        &self.table
    }

    /// Get selector statistics.
    pub fn stats(&self) -> &SelectorStats {
        &self.stats
    }

    /// Connect to a live backend registered for `uid`.
    ///
    /// Returns the connected stream and the address it was drawn from, or
    /// [`MuxError::NoBackendAvailable`] once no candidates are left.
    pub async fn select_backend(&self, uid: Uid) -> MuxResult<(UnixStream, BackendAddress)> {
        let mut entries = self.table.lock().await;

        loop {
            let candidate = {
                let Some(set) = entries.get(&uid) else {
                    break;
                };
                let mut rng = rand::rng();
                match set.iter().choose(&mut rng) {
                    Some(addr) => addr.clone(),
                    None => break,
                }
            };

            self.stats.attempts.fetch_add(1, Ordering::Relaxed);
            debug!(uid, backend = %candidate, "Connecting to backend");

            match self.connect(uid, &candidate).await {
                Ok(stream) => {
                    self.stats.selected.fetch_add(1, Ordering::Relaxed);
                    info!(uid, backend = %candidate, "Using backend");
                    return Ok((stream, candidate));
                }
                Err(e) => {
                    warn!(uid, backend = %candidate, error = %e, "Stale backend evicted");
                    self.stats.evicted.fetch_add(1, Ordering::Relaxed);
                    if let Some(set) = entries.get_mut(&uid) {
                        set.remove(&candidate);
                    }
                }
            }
        }

        self.stats.unavailable.fetch_add(1, Ordering::Relaxed);
        info!(uid, "No backend available");
        Err(MuxError::NoBackendAvailable { uid })
    }

    /// Connect to `addr`, waiting out a full accept queue.
    ///
    /// A non-blocking connect to a listener whose backlog is full fails with
    /// `EAGAIN`; the backend is alive, so retry instead of reporting failure.
    async fn connect(&self, uid: Uid, addr: &str) -> io::Result<UnixStream> {
        let mut waiting = false;
        loop {
            match UnixStream::connect(addr).await {
                Err(e) if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
                {
                    if !waiting {
                        debug!(uid, backend = %addr, "Backend accept queue full, waiting");
                        waiting = true;
                    }
                    self.stats.busy_retries.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(BUSY_RETRY_DELAY).await;
                }
                result => return result,
            }
        }
    }
}
