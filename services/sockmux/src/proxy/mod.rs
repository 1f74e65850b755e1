//! Per-uid Unix socket routing.
//!
//! This module provides:
//! - Peer credential resolution for accepted connections
//! - The per-identity backend registry
//! - Random backend selection with stale-candidate eviction
//! - The bidirectional byte relay
//! - Unix socket listeners and their accept loops
//!
//! ## Architecture
//!
//! ```text
//! Client -> Listener -> Credentials (uid) -> BackendSelector -> Relay <-> Backend
//!                                                  |
//!                                            RoutingTable <- ControlProtocol
//! ```

mod backend;
pub mod credentials;
mod listener;
mod registry;
pub mod relay;

pub use backend::{BackendSelector, SelectorStats};
pub use listener::{Listener, ListenerStats};
pub use registry::{BackendAddress, RoutingTable, SharedRoutingTable, Uid};
pub use relay::{couple, RelayEnd, RelayStats, CHUNK_SIZE};
