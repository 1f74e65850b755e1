//! Peer credentials for Unix domain stream sockets.
//!
//! When a socket has `SO_PASSCRED` enabled, the kernel attaches an
//! `SCM_CREDENTIALS` record (pid, uid, gid of the sender) to the data the peer
//! sends. This library provides:
//! - Opting a socket (listener or connection) into credential passing
//! - A typed decoder for the ancillary buffer filled by `recvmsg(2)`
//! - A non-consuming peek that reads the first record without taking any
//!   payload bytes off the stream

use std::io;
use std::mem;
use std::os::fd::{AsFd, AsRawFd, RawFd};

use nix::sys::socket::{setsockopt, sockopt};
use thiserror::Error;

/// Number of stray descriptors the control buffer leaves room for.
///
/// Peers are not expected to send `SCM_RIGHTS`, but a record that does not
/// fit would truncate the credentials that follow it.
pub const MAX_STRAY_FDS: usize = 16;

/// Credential resolution errors.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// No `SCM_CREDENTIALS` record, or the record carried the sentinel pid 0.
    #[error("no peer credentials attached")]
    NoCredentials,

    /// The kernel truncated the ancillary data (`MSG_CTRUNC`).
    #[error("ancillary data truncated")]
    Truncated,

    /// IO error from the socket.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Identity of the process on the other end of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerCredentials {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
}

/// Enable `SO_PASSCRED` on a socket.
///
/// Set on a listening socket before `bind`, the flag is inherited by every
/// connection it accepts.
pub fn enable_passcred<F: AsFd>(socket: &F) -> Result<(), CredentialError> {
    setsockopt(socket, sockopt::PassCred, &true).map_err(|errno| CredentialError::Io(errno.into()))
}

/// Typed decoder over an ancillary-data buffer.
///
/// The buffer is sized for one `ucred` plus [`MAX_STRAY_FDS`] descriptors and
/// is backed by `u64` words so every `cmsghdr` inside it is properly aligned.
pub struct CredentialDecoder {
    buffer: Vec<u64>,
    space: usize,
}

impl CredentialDecoder {
    /// Create a decoder with an empty control buffer.
    pub fn new() -> Self {
        let payload =
            mem::size_of::<libc::ucred>() + MAX_STRAY_FDS * mem::size_of::<libc::c_int>();
        // SAFETY: CMSG_SPACE is pure arithmetic on its argument.
        let space = unsafe { libc::CMSG_SPACE(payload as libc::c_uint) } as usize;
        Self {
            buffer: vec![0u64; space.div_ceil(mem::size_of::<u64>())],
            space,
        }
    }

    /// Size in bytes of the control buffer handed to `recvmsg`.
    pub fn capacity(&self) -> usize {
        self.space
    }

    fn control_ptr(&mut self) -> *mut libc::c_void {
        self.buffer.as_mut_ptr().cast()
    }

    /// Decode the credentials out of the first `control_len` bytes of the
    /// buffer, given the `msg_flags` returned by `recvmsg`.
    ///
    /// If several credential records are present the last one wins.
    pub fn decode(
        &self,
        control_len: usize,
        flags: libc::c_int,
    ) -> Result<PeerCredentials, CredentialError> {
        if flags & libc::MSG_CTRUNC != 0 {
            return Err(CredentialError::Truncated);
        }

        // SAFETY: a zeroed msghdr is a valid "empty" header.
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_control = self.buffer.as_ptr() as *mut libc::c_void;
        msg.msg_controllen = control_len.min(self.space) as _;

        let min_len = unsafe { libc::CMSG_LEN(mem::size_of::<libc::ucred>() as libc::c_uint) };
        let mut found: Option<libc::ucred> = None;

        // SAFETY: msg_control points into our own buffer and msg_controllen
        // never exceeds its size; CMSG_NXTHDR stops at the end of it.
        unsafe {
            let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
            while !cmsg.is_null() {
                let header = &*cmsg;
                if header.cmsg_level == libc::SOL_SOCKET
                    && header.cmsg_type == libc::SCM_CREDENTIALS
                    && header.cmsg_len as usize >= min_len as usize
                {
                    let data = libc::CMSG_DATA(cmsg).cast::<libc::ucred>();
                    found = Some(std::ptr::read_unaligned(data));
                }
                cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
            }
        }

        match found {
            Some(ucred) if ucred.pid != 0 => Ok(PeerCredentials {
                pid: ucred.pid,
                uid: ucred.uid,
                gid: ucred.gid,
            }),
            _ => Err(CredentialError::NoCredentials),
        }
    }
}

impl Default for CredentialDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Read the credentials attached to the next pending data on `socket`
/// without consuming it.
///
/// Uses `MSG_PEEK`, so every payload byte is still readable afterwards. On a
/// blocking socket this waits for the peer's first send; on a non-blocking
/// socket it fails with `WouldBlock` until data is queued. A peer that closes
/// without sending yields [`CredentialError::NoCredentials`].
pub fn peek_credentials<F: AsFd>(socket: &F) -> Result<PeerCredentials, CredentialError> {
    peek_raw(socket.as_fd().as_raw_fd())
}

fn peek_raw(fd: RawFd) -> Result<PeerCredentials, CredentialError> {
    let mut decoder = CredentialDecoder::new();
    let mut byte = [0u8; 1];
    let mut iov = libc::iovec {
        iov_base: byte.as_mut_ptr().cast(),
        iov_len: byte.len(),
    };

    // SAFETY: a zeroed msghdr is valid; every pointer set below outlives the call.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = decoder.control_ptr();
    msg.msg_controllen = decoder.capacity() as _;

    loop {
        // SAFETY: msg describes buffers owned by this frame.
        let received =
            unsafe { libc::recvmsg(fd, &mut msg, libc::MSG_PEEK | libc::MSG_CMSG_CLOEXEC) };
        if received >= 0 {
            break;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err.into());
        }
    }

    decoder.decode(msg.msg_controllen as usize, msg.msg_flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_decoder_capacity_fits_ucred_and_fds() {
        let decoder = CredentialDecoder::new();
        let payload =
            mem::size_of::<libc::ucred>() + MAX_STRAY_FDS * mem::size_of::<libc::c_int>();
        assert!(decoder.capacity() >= payload);
    }

    #[test]
    fn test_decode_empty_buffer() {
        let decoder = CredentialDecoder::new();
        assert!(matches!(
            decoder.decode(0, 0),
            Err(CredentialError::NoCredentials)
        ));
    }

    #[test]
    fn test_decode_truncated() {
        let decoder = CredentialDecoder::new();
        assert!(matches!(
            decoder.decode(0, libc::MSG_CTRUNC),
            Err(CredentialError::Truncated)
        ));
    }

    #[test]
    fn test_peek_returns_own_credentials() {
        let (mut client, server) = UnixStream::pair().unwrap();
        enable_passcred(&server).unwrap();

        client.write_all(b"hello").unwrap();

        let creds = peek_credentials(&server).unwrap();
        assert_eq!(creds.pid, std::process::id() as i32);
        assert_eq!(creds.uid, unsafe { libc::getuid() });
        assert_eq!(creds.gid, unsafe { libc::getgid() });
    }

    #[test]
    fn test_peek_does_not_consume_payload() {
        let (mut client, mut server) = UnixStream::pair().unwrap();
        enable_passcred(&server).unwrap();

        client.write_all(b"payload").unwrap();
        drop(client);

        peek_credentials(&server).unwrap();

        let mut data = Vec::new();
        server.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"payload");
    }

    #[test]
    fn test_peek_without_passcred() {
        let (mut client, server) = UnixStream::pair().unwrap();

        client.write_all(b"x").unwrap();

        assert!(matches!(
            peek_credentials(&server),
            Err(CredentialError::NoCredentials)
        ));
    }

    #[test]
    fn test_peek_nonblocking_would_block() {
        let (_client, server) = UnixStream::pair().unwrap();
        enable_passcred(&server).unwrap();
        server.set_nonblocking(true).unwrap();

        match peek_credentials(&server) {
            Err(CredentialError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::WouldBlock),
            other => panic!("Expected WouldBlock, got {:?}", other),
        }
    }
}
