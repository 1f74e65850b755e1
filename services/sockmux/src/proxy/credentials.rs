//! Peer credential resolution for accepted connections.
//!
//! Must run before anything reads from the connection. It waits for the
//! peer's first send and peeks the `SCM_CREDENTIALS` record attached to it,
//! leaving every payload byte in place for whoever reads next.

use sockmux_peercred::{peek_credentials, CredentialError, PeerCredentials};
use tokio::io::Interest;
use tokio::net::UnixStream;

/// Resolve the credentials of the process on the other end of `stream`.
///
/// Blocks until the peer sends something or closes; there is no timeout.
pub async fn resolve(stream: &UnixStream) -> Result<PeerCredentials, CredentialError> {
    stream
        .async_io(Interest::READABLE, || match peek_credentials(stream) {
            // Only IO errors (WouldBlock in particular) go back to the
            // reactor; decode failures are final.
            Err(CredentialError::Io(e)) => Err(e),
            other => Ok(other),
        })
        .await
        .map_err(CredentialError::Io)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use sockmux_peercred::enable_passcred;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_resolve_waits_for_first_send() {
        let (mut client, server) = UnixStream::pair().unwrap();
        enable_passcred(&server).unwrap();

        let resolver = tokio::spawn(async move {
            let creds = resolve(&server).await;
            (creds, server)
        });

        tokio::task::yield_now().await;
        client.write_all(b"first").await.unwrap();

        let (creds, mut server) = resolver.await.unwrap();
        let creds = creds.unwrap();
        assert_eq!(creds.pid, std::process::id() as i32);
        assert_eq!(creds.uid, unsafe { libc::getuid() });

        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"first");
    }

    #[tokio::test]
    async fn test_resolve_peer_closed_without_sending() {
        let (client, server) = UnixStream::pair().unwrap();
        enable_passcred(&server).unwrap();
        drop(client);

        assert!(matches!(
            resolve(&server).await,
            Err(CredentialError::NoCredentials)
        ));
    }
}
