// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
//! Per-connection state for the event loop.
//!
//! The read side is a small accumulator state machine — read header, then
//! read exactly as many payload bytes as the header declares — modeled on
//! the pack's `TcpStream` `RxState::{ReadingHeader, ReadingPayload}` split,
//! simplified because every message here fits in a couple hundred bytes.

use std::os::unix::net::UnixStream;

use crate::error::{Result, StoreError};
use crate::framing;
use crate::protocol::{MessageHeader, HEADER_SIZE};

#[derive(Debug)]
enum ReadState {
    Header { have: Vec<u8> },
    Payload { header: MessageHeader, have: Vec<u8> },
}

impl Default for ReadState {
    fn default() -> Self {
        ReadState::Header { have: Vec::with_capacity(HEADER_SIZE) }
    }
}

/// What a connection is for, decided the moment it registers a
/// subscription — from then on it only ever receives drained
/// notifications (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Subscriber,
}

pub struct Connection {
    pub stream: UnixStream,
    pub role: Role,
    read_state: ReadState,
    /// Set once a `SUBSCRIBE` header has been read but the byte+fd
    /// handshake (spec §4.4) hasn't completed yet.
    pub awaiting_subscribe: bool,
}

impl Connection {
    pub fn new(stream: UnixStream) -> Self {
        Connection {
            stream,
            role: Role::Client,
            read_state: ReadState::default(),
            awaiting_subscribe: false,
        }
    }

    /// Pumps the read side once. Returns a complete `(opcode, payload)`
    /// message as soon as one is fully buffered; `Ok(None)` means more
    /// data is needed and the caller should wait for the next
    /// read-readiness event.
    pub fn poll_read(&mut self, fd: std::os::fd::RawFd) -> Result<Option<(MessageHeader, Vec<u8>)>> {
        loop {
            match &mut self.read_state {
                ReadState::Header { have } => {
                    let mut chunk = [0u8; HEADER_SIZE];
                    let need = HEADER_SIZE - have.len();
                    match framing::try_read(fd, &mut chunk[..need])? {
                        None => return Ok(None),
                        Some(n) => {
                            have.extend_from_slice(&chunk[..n]);
                            if have.len() < HEADER_SIZE {
                                return Ok(None);
                            }
                            let header = MessageHeader::decode(have);
                            if header.length < 0 {
                                return Err(StoreError::Framing("negative payload length"));
                            }
                            self.read_state = ReadState::Payload {
                                header,
                                have: Vec::with_capacity(header.length as usize),
                            };
                        }
                    }
                }
                ReadState::Payload { header, have } => {
                    let remaining = header.length as usize - have.len();
                    if remaining == 0 {
                        let header = *header;
                        let payload = std::mem::take(have);
                        self.read_state = ReadState::default();
                        return Ok(Some((header, payload)));
                    }
                    let mut chunk = vec![0u8; remaining];
                    match framing::try_read(fd, &mut chunk)? {
                        None => return Ok(None),
                        Some(n) => have.extend_from_slice(&chunk[..n]),
                    }
                }
            }
        }
    }
}
