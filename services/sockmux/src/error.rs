//! Error types for the socket multiplexer.

use std::path::PathBuf;

use sockmux_peercred::CredentialError;
use thiserror::Error;

use crate::proxy::Uid;

/// Multiplexer errors.
#[derive(Debug, Error)]
pub enum MuxError {
    /// The peer's credentials could not be resolved.
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    /// The identity has no registered or no reachable backend.
    #[error("no backend available for uid {uid}")]
    NoBackendAvailable { uid: Uid },

    /// A listening socket could not be set up.
    #[error("failed to bind {}: {source}", path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// IO error on an established connection.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MuxError {
    /// Short reason code for structured logs.
    pub fn reason_code(&self) -> &'static str {
        match self {
            MuxError::Credential(_) => "credential_error",
            MuxError::NoBackendAvailable { .. } => "no_backend_available",
            MuxError::Bind { .. } => "bind_failed",
            MuxError::Io(_) => "io_error",
        }
    }
}

/// Result alias for multiplexer operations.
pub type MuxResult<T> = Result<T, MuxError>;
