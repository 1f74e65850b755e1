pub mod config;
pub mod control;
pub mod error;
pub mod proxy;
pub mod server;
pub mod shutdown;

pub use config::{Cli, ServerConfig};
pub use control::{Command, ControlProtocol};
pub use error::{MuxError, MuxResult};
pub use proxy::{
    couple, BackendAddress, BackendSelector, Listener, ListenerStats, RelayEnd, RelayStats,
    RoutingTable, SelectorStats, SharedRoutingTable, Uid,
};
pub use server::Server;
pub use shutdown::ShutdownSignal;
