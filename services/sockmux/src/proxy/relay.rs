//! Bidirectional byte relay between a client and its backend.
//!
//! Bytes are forwarded verbatim in chunks of at most [`CHUNK_SIZE`]. Each
//! direction has exactly one chunk in flight and waits for its write to
//! complete before reading again, so a slow receiver throttles its sender.
//!
//! Both directions are pumped concurrently. Readiness on one side never holds
//! back the other, so neither direction can starve under sustained load in
//! both directions.
//!
//! The relay ends as soon as either side reaches end-of-stream or any read or
//! write fails. It owns both streams and closes them before returning.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest chunk read from one side before it is forwarded to the other.
pub const CHUNK_SIZE: usize = 1024;

/// Why a relay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// The client side reached end-of-stream.
    ClientClosed,
    /// The backend side reached end-of-stream.
    BackendClosed,
    /// A read or write failed.
    Failed(io::ErrorKind),
}

/// Outcome of a finished relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    /// Bytes forwarded from client to backend.
    pub bytes_to_backend: u64,
    /// Bytes forwarded from backend to client.
    pub bytes_from_backend: u64,
    /// What ended the relay.
    pub end: RelayEnd,
}

/// Couple `client` and `backend` until one of them closes or fails.
pub async fn couple<C, B>(client: C, backend: B) -> RelayStats
where
    C: AsyncRead + AsyncWrite,
    B: AsyncRead + AsyncWrite,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut backend_read, mut backend_write) = tokio::io::split(backend);

    let mut bytes_to_backend = 0u64;
    let mut bytes_from_backend = 0u64;

    let end = tokio::select! {
        result = pump(&mut client_read, &mut backend_write, &mut bytes_to_backend) => {
            match result {
                Ok(()) => RelayEnd::ClientClosed,
                Err(e) => RelayEnd::Failed(e.kind()),
            }
        }
        result = pump(&mut backend_read, &mut client_write, &mut bytes_from_backend) => {
            match result {
                Ok(()) => RelayEnd::BackendClosed,
                Err(e) => RelayEnd::Failed(e.kind()),
            }
        }
    };

    // Dropping both halves of a split stream closes it.
    drop((client_read, client_write));
    drop((backend_read, backend_write));

    RelayStats {
        bytes_to_backend,
        bytes_from_backend,
        end,
    }
}

/// Forward from `reader` to `writer` until end-of-stream.
async fn pump<R, W>(reader: &mut R, writer: &mut W, total: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        *total += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;
    use tokio::net::UnixStream;

    #[tokio::test]
    async fn test_relay_both_directions_until_client_closes() {
        let (mut client_app, client_side) = duplex(64);
        let (backend_side, mut backend_app) = duplex(64);

        let relay = tokio::spawn(couple(client_side, backend_side));

        client_app.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        backend_app.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        backend_app.write_all(b"pong!").await.unwrap();
        let mut buf = [0u8; 5];
        client_app.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong!");

        drop(client_app);

        let stats = relay.await.unwrap();
        assert_eq!(stats.end, RelayEnd::ClientClosed);
        assert_eq!(stats.bytes_to_backend, 4);
        assert_eq!(stats.bytes_from_backend, 5);

        // The relay closed the backend side too.
        let mut rest = Vec::new();
        backend_app.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_relay_large_payload_is_verbatim() {
        let (mut client_app, client_side) = duplex(64);
        let (backend_side, mut backend_app) = duplex(64);

        let relay = tokio::spawn(couple(client_side, backend_side));

        let payload: Vec<u8> = (0..10 * CHUNK_SIZE + 17).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        let writer = tokio::spawn(async move {
            backend_app.write_all(&payload).await.unwrap();
            backend_app
        });

        let mut received = vec![0u8; expected.len()];
        client_app.read_exact(&mut received).await.unwrap();
        assert_eq!(received, expected);

        drop(writer.await.unwrap());

        let stats = relay.await.unwrap();
        assert_eq!(stats.end, RelayEnd::BackendClosed);
        assert_eq!(stats.bytes_from_backend, expected.len() as u64);
    }

    #[tokio::test]
    async fn test_relay_closes_client_when_backend_closes() {
        let (mut client_app, client_side) = UnixStream::pair().unwrap();
        let (backend_side, backend_app) = UnixStream::pair().unwrap();

        let relay = tokio::spawn(couple(client_side, backend_side));

        drop(backend_app);

        let stats = relay.await.unwrap();
        assert_eq!(stats.end, RelayEnd::BackendClosed);
        assert_eq!(stats.bytes_to_backend, 0);

        let mut rest = Vec::new();
        client_app.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }
}
