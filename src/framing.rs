// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
//! Framed message I/O and single-fd ancillary-data passing.
//!
//! Grounded in `nix::sys::socket`'s `sendmsg`/`recvmsg` +
//! `ControlMessage::ScmRights` idiom (the same pattern used for Wayland fd
//! passing in the reference pack), rather than hand-rolling raw
//! `cmsghdr` parsing against `libc`.

use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::sys::socket::{self, ControlMessage, ControlMessageOwned, MsgFlags};

use crate::error::{Result, StoreError};

/// Non-blocking read into `buf`. `Ok(None)` means no data is available yet
/// (EAGAIN/EWOULDBLOCK) — the caller should retry on the next
/// read-readiness notification, not treat it as EOF.
pub fn try_read(fd: RawFd, buf: &mut [u8]) -> Result<Option<usize>> {
    match socket::recv(fd, buf, MsgFlags::MSG_DONTWAIT) {
        Ok(0) => Err(StoreError::Disconnected),
        Ok(n) => Ok(Some(n)),
        Err(Errno::EAGAIN) => Ok(None),
        Err(e) => Err(StoreError::Io(io::Error::from(e))),
    }
}

/// Non-blocking best-effort send. Returns the number of bytes actually
/// written; `0` means the socket is currently not writable at all (would
/// block immediately) — the caller buffers the remainder and retries on
/// write-readiness (spec §4.3).
pub fn try_send(fd: RawFd, buf: &[u8]) -> Result<usize> {
    match socket::send(fd, buf, MsgFlags::MSG_DONTWAIT) {
        Ok(n) => Ok(n),
        Err(Errno::EAGAIN) => Ok(0),
        Err(e) => Err(StoreError::Io(io::Error::from(e))),
    }
}

/// Sends `payload`, optionally attaching `pass_fd` as ancillary `SCM_RIGHTS`
/// data on the first (and only) iovec. Used for `CREATE`/`GET`/`SEAL`
/// replies, which hand the client a duplicated mmap fd.
pub fn send_with_fd(fd: RawFd, payload: &[u8], pass_fd: Option<RawFd>) -> Result<()> {
    let iov = [IoSlice::new(payload)];
    let sent = match pass_fd {
        Some(raw) => {
            let fds = [raw];
            let cmsg = [ControlMessage::ScmRights(&fds)];
            socket::sendmsg::<()>(fd, &iov, &cmsg, MsgFlags::empty(), None)
        }
        None => socket::sendmsg::<()>(fd, &iov, &[], MsgFlags::empty(), None),
    }
    .map_err(|e| StoreError::Io(io::Error::from(e)))?;

    if sent != payload.len() {
        return Err(StoreError::Framing("short write on reply"));
    }
    Ok(())
}

/// Reads exactly one byte plus exactly one ancillary fd — the
/// `SUBSCRIBE` registration handshake (spec §4.4). A violation (no fd
/// attached, or more than one) is a protocol violation from a trusted local
/// client and is reported as a framing error for the caller to assert on.
/// `Ok(None)` means no data is available yet — the caller retries on the
/// next read-readiness event, same convention as [`try_read`].
pub fn recv_byte_and_fd(fd: RawFd) -> Result<Option<(u8, OwnedFd)>> {
    let mut byte = [0u8; 1];
    let mut iov = [IoSliceMut::new(&mut byte)];
    let mut cmsg_buf = nix::cmsg_space!(RawFd);

    let msg = match socket::recvmsg::<()>(fd, &mut iov, Some(&mut cmsg_buf), MsgFlags::MSG_DONTWAIT)
    {
        Ok(msg) => msg,
        Err(Errno::EAGAIN) => return Ok(None),
        Err(e) => return Err(StoreError::Io(io::Error::from(e))),
    };

    if msg.bytes == 0 {
        return Err(StoreError::Disconnected);
    }

    let mut received_fd = None;
    for cmsg in msg.cmsgs().map_err(|_| StoreError::FdPassing("malformed cmsg"))? {
        if let ControlMessageOwned::ScmRights(fds) = cmsg {
            if fds.len() != 1 {
                return Err(StoreError::FdPassing("expected exactly one fd"));
            }
            received_fd = Some(unsafe { OwnedFd::from_raw_fd(fds[0]) });
        }
    }

    let received_fd = received_fd.ok_or(StoreError::FdPassing("no fd attached to subscribe"))?;
    Ok(Some((byte[0], received_fd)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn byte_and_fd_roundtrip() {
        let (a, b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        b.set_nonblocking(true).unwrap();

        let passed = UnixStream::pair().unwrap().0;
        send_with_fd(a.as_raw_fd(), &[42u8], Some(passed.as_raw_fd())).unwrap();

        let (byte, fd) = recv_byte_and_fd(b.as_raw_fd()).unwrap().expect("data available");
        assert_eq!(byte, 42);
        assert!(fd.as_raw_fd() >= 0);
    }

    #[test]
    fn try_read_returns_none_when_empty() {
        let (a, _b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        let mut buf = [0u8; 16];
        assert!(try_read(a.as_raw_fd(), &mut buf).unwrap().is_none());
    }
}
