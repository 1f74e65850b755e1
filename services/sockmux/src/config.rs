//! Multiplexer configuration.
//!
//! Built once at startup from the command line and immutable afterwards.

use std::path::PathBuf;

use clap::{ArgAction, Parser};

/// Default control socket path.
pub const DEFAULT_CONTROL_SOCKET: &str = "/tmp/socket_multiplexer_control";

/// Default master socket path.
pub const DEFAULT_MASTER_SOCKET: &str = "/tmp/socket_multiplexer";

/// Mode applied to both socket files after bind.
pub const DEFAULT_SOCKET_MODE: u32 = 0o777;

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Control channel socket path.
    pub control_socket_path: PathBuf,

    /// Public (master) socket path clients connect to.
    pub master_socket_path: PathBuf,

    /// File mode for both socket files.
    pub socket_mode: u32,
}

impl ServerConfig {
    /// Create a configuration for the given socket paths.
    pub fn new(
        control_socket_path: impl Into<PathBuf>,
        master_socket_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            control_socket_path: control_socket_path.into(),
            master_socket_path: master_socket_path.into(),
            socket_mode: DEFAULT_SOCKET_MODE,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CONTROL_SOCKET, DEFAULT_MASTER_SOCKET)
    }
}

/// Command line interface.
#[derive(Debug, Parser)]
#[command(
    name = "sockmux",
    version,
    about = "Route Unix socket connections to per-uid backends",
    disable_help_flag = true,
    disable_version_flag = true
)]
pub struct Cli {
    /// Control socket path.
    #[arg(short = 'c', long = "control", value_name = "PATH", default_value = DEFAULT_CONTROL_SOCKET)]
    pub control: PathBuf,

    /// Interface socket path.
    #[arg(short = 's', long = "socket", value_name = "PATH", default_value = DEFAULT_MASTER_SOCKET)]
    pub socket: PathBuf,

    /// Log level used when RUST_LOG is not set (trace, debug, info, warn, error).
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Display this help and exit.
    #[arg(short = '?', long = "help", action = ArgAction::Help)]
    help: Option<bool>,

    /// Output version information and exit.
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: Option<bool>,
}

impl Cli {
    /// Server configuration described by these arguments.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::new(self.control.clone(), self.socket.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["sockmux"]).unwrap();
        assert_eq!(cli.server_config(), ServerConfig::default());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_short_and_long_paths() {
        let cli = Cli::try_parse_from(["sockmux", "-c", "/run/ctl", "--socket=/run/mux"]).unwrap();
        let config = cli.server_config();
        assert_eq!(config.control_socket_path, PathBuf::from("/run/ctl"));
        assert_eq!(config.master_socket_path, PathBuf::from("/run/mux"));
        assert_eq!(config.socket_mode, DEFAULT_SOCKET_MODE);
    }

    #[test]
    fn test_help_and_version_flags() {
        let err = Cli::try_parse_from(["sockmux", "-?"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        assert!(!err.use_stderr());

        let err = Cli::try_parse_from(["sockmux", "--version"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayVersion);

        let err = Cli::try_parse_from(["sockmux", "-v"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_unknown_option() {
        let err = Cli::try_parse_from(["sockmux", "--bogus"]).unwrap_err();
        assert!(err.use_stderr());
    }
}
