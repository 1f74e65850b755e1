//! Per-identity backend registry.
//!
//! Maps a peer uid to the set of backend socket paths registered for it.
//!
//! - One exclusive lock guards every read and write, including the whole
//!   backend selection sequence (see [`super::backend`])
//! - An unknown uid reads as an empty set
//! - Entries only change through control commands and selector eviction
//! - Nothing is persisted; the table lives as long as the process

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Peer identity: the uid reported by the kernel for a connection.
pub type Uid = u32;

/// Opaque backend address, a Unix socket path.
pub type BackendAddress = String;

/// Backing map guarded by the table lock.
pub type Entries = HashMap<Uid, HashSet<BackendAddress>>;

/// Routing table from identity to backend addresses.
#[derive(Debug, Default)]
pub struct RoutingTable {
    entries: Mutex<Entries>,
}

impl RoutingTable {
    /// Create a new empty routing table.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a backend for `uid`. Returns `false` if it was already present.
    pub async fn add(&self, uid: Uid, addr: &str) -> bool {
        let mut entries = self.entries.lock().await;
        let inserted = entries.entry(uid).or_default().insert(addr.to_string());
        debug!(uid, backend = %addr, inserted, "Backend added");
        inserted
    }

    /// Unregister a backend for `uid`. Returns `false` if it was not present.
    pub async fn remove(&self, uid: Uid, addr: &str) -> bool {
        let mut entries = self.entries.lock().await;
        let removed = entries
            .get_mut(&uid)
            .map(|set| set.remove(addr))
            .unwrap_or(false);
        debug!(uid, backend = %addr, removed, "Backend removed");
        removed
    }

    /// Drop every backend registered for `uid`.
    pub async fn clear(&self, uid: Uid) {
        let mut entries = self.entries.lock().await;
        if let Some(set) = entries.get_mut(&uid) {
            debug!(uid, backend_count = set.len(), "Backends cleared");
            set.clear();
        }
    }

    /// Backends registered for `uid`, in set iteration order.
    pub async fn list(&self, uid: Uid) -> Vec<BackendAddress> {
        let entries = self.entries.lock().await;
        entries
            .get(&uid)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of backends registered for `uid`.
    pub async fn len(&self, uid: Uid) -> usize {
        let entries = self.entries.lock().await;
        entries.get(&uid).map(HashSet::len).unwrap_or(0)
    }

    /// Check if `uid` has no backends.
    pub async fn is_empty(&self, uid: Uid) -> bool {
        self.len(uid).await == 0
    }

    /// Number of identities with at least one backend.
    pub async fn identity_count(&self) -> usize {
        let entries = self.entries.lock().await;
        entries.values().filter(|set| !set.is_empty()).count()
    }

    /// Take the table lock.
    ///
    /// The backend selector holds this guard while it draws, connects to and
    /// evicts candidates, so that sequence is atomic with respect to every
    /// other table operation.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().await
    }
}

/// Shared routing table reference.
pub type SharedRoutingTable = Arc<RoutingTable>;
