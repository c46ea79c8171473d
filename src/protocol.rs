// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
//! Wire format: fixed, host-native-order byte layouts, matching the
//! teacher's `channel.rs` idiom of packing structs with `to_ne_bytes`/
//! `from_ne_bytes` rather than pulling in a serialization crate. The store
//! is local-only (§9), so there is no cross-host byte-order concern to
//! design for.

use crate::object_id::ObjectId;

/// Every request starts with a fixed 16-byte header: opcode, then the
/// length in bytes of the payload that follows it.
pub const HEADER_SIZE: usize = 16;

/// `object_id (20) + data_size (8) + metadata_size (8) + addr (4) + port (4)`.
pub const REQUEST_PAYLOAD_SIZE: usize = ObjectId::SIZE + 8 + 8 + 4 + 4;

/// `data_offset (8) + metadata_offset (8) + map_size (8) + data_size (8) +
/// metadata_size (8) + has_object (4) + store_fd_val (4)`.
pub const REPLY_SIZE: usize = 8 * 5 + 4 * 2;

/// Notification frames on a subscriber's stream are raw, concatenated
/// object ids with no header.
pub const NOTIFICATION_FRAME_SIZE: usize = ObjectId::SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Create,
    Get,
    Contains,
    Seal,
    Delete,
    Transfer,
    Data,
    Subscribe,
    Disconnect,
}

impl Opcode {
    pub const CREATE: i64 = 128;
    pub const GET: i64 = 129;
    pub const CONTAINS: i64 = 130;
    pub const SEAL: i64 = 131;
    pub const DELETE: i64 = 132;
    pub const TRANSFER: i64 = 133;
    pub const DATA: i64 = 134;
    pub const SUBSCRIBE: i64 = 135;
    pub const DISCONNECT: i64 = 136;

    /// Decodes a raw opcode. Any value outside the table is a protocol
    /// violation from a trusted local client — a fatal, unreachable
    /// condition, not a recoverable error (spec §4.5, §7).
    pub fn decode(raw: i64) -> Opcode {
        match raw {
            Self::CREATE => Opcode::Create,
            Self::GET => Opcode::Get,
            Self::CONTAINS => Opcode::Contains,
            Self::SEAL => Opcode::Seal,
            Self::DELETE => Opcode::Delete,
            Self::TRANSFER => Opcode::Transfer,
            Self::DATA => Opcode::Data,
            Self::SUBSCRIBE => Opcode::Subscribe,
            Self::DISCONNECT => Opcode::Disconnect,
            other => unreachable!("unknown opcode on wire: {other}"),
        }
    }

    pub fn encode(self) -> i64 {
        match self {
            Opcode::Create => Self::CREATE,
            Opcode::Get => Self::GET,
            Opcode::Contains => Self::CONTAINS,
            Opcode::Seal => Self::SEAL,
            Opcode::Delete => Self::DELETE,
            Opcode::Transfer => Self::TRANSFER,
            Opcode::Data => Self::DATA,
            Opcode::Subscribe => Self::SUBSCRIBE,
            Opcode::Disconnect => Self::DISCONNECT,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MessageHeader {
    pub opcode: i64,
    pub length: i64,
}

impl MessageHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.opcode.to_ne_bytes());
        buf[8..16].copy_from_slice(&self.length.to_ne_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> MessageHeader {
        debug_assert!(buf.len() >= HEADER_SIZE);
        let opcode = i64::from_ne_bytes(buf[0..8].try_into().unwrap());
        let length = i64::from_ne_bytes(buf[8..16].try_into().unwrap());
        MessageHeader { opcode, length }
    }
}

/// The request payload shared by `CREATE`, `GET`, `CONTAINS`, `SEAL`,
/// `DELETE` and `TRANSFER`. Unused fields for a given opcode are sent
/// zeroed, matching the original C client behavior.
#[derive(Debug, Clone, Copy)]
pub struct RequestPayload {
    pub object_id: ObjectId,
    pub data_size: i64,
    pub metadata_size: i64,
    pub addr: [u8; 4],
    pub port: i32,
}

impl RequestPayload {
    pub fn encode(&self) -> [u8; REQUEST_PAYLOAD_SIZE] {
        let mut buf = [0u8; REQUEST_PAYLOAD_SIZE];
        let mut off = 0;
        buf[off..off + ObjectId::SIZE].copy_from_slice(self.object_id.as_bytes());
        off += ObjectId::SIZE;
        buf[off..off + 8].copy_from_slice(&self.data_size.to_ne_bytes());
        off += 8;
        buf[off..off + 8].copy_from_slice(&self.metadata_size.to_ne_bytes());
        off += 8;
        buf[off..off + 4].copy_from_slice(&self.addr);
        off += 4;
        buf[off..off + 4].copy_from_slice(&self.port.to_ne_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<RequestPayload> {
        if buf.len() != REQUEST_PAYLOAD_SIZE {
            return None;
        }
        let mut off = 0;
        let object_id = ObjectId::from_slice(&buf[off..off + ObjectId::SIZE])?;
        off += ObjectId::SIZE;
        let data_size = i64::from_ne_bytes(buf[off..off + 8].try_into().ok()?);
        off += 8;
        let metadata_size = i64::from_ne_bytes(buf[off..off + 8].try_into().ok()?);
        off += 8;
        let mut addr = [0u8; 4];
        addr.copy_from_slice(&buf[off..off + 4]);
        off += 4;
        let port = i32::from_ne_bytes(buf[off..off + 4].try_into().ok()?);
        Some(RequestPayload {
            object_id,
            data_size,
            metadata_size,
            addr,
            port,
        })
    }
}

/// The fixed-size reply record. Always zeroed before population, matching
/// `memset(&reply, 0, sizeof(reply))` in the original `plasma_store.c` — a
/// `CONTAINS` miss or a not-found `GET` therefore carries `has_object = 0`
/// and every other field at zero rather than stale data.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reply {
    pub data_offset: i64,
    pub metadata_offset: i64,
    pub map_size: i64,
    pub data_size: i64,
    pub metadata_size: i64,
    pub has_object: i32,
    pub store_fd_val: i32,
}

impl Reply {
    pub fn not_found() -> Reply {
        Reply::default()
    }

    pub fn encode(&self) -> [u8; REPLY_SIZE] {
        let mut buf = [0u8; REPLY_SIZE];
        let mut off = 0;
        for field in [
            self.data_offset,
            self.metadata_offset,
            self.map_size,
            self.data_size,
            self.metadata_size,
        ] {
            buf[off..off + 8].copy_from_slice(&field.to_ne_bytes());
            off += 8;
        }
        buf[off..off + 4].copy_from_slice(&self.has_object.to_ne_bytes());
        off += 4;
        buf[off..off + 4].copy_from_slice(&self.store_fd_val.to_ne_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Reply> {
        if buf.len() != REPLY_SIZE {
            return None;
        }
        let mut off = 0;
        let mut next_i64 = || {
            let v = i64::from_ne_bytes(buf[off..off + 8].try_into().unwrap());
            off += 8;
            v
        };
        let data_offset = next_i64();
        let metadata_offset = next_i64();
        let map_size = next_i64();
        let data_size = next_i64();
        let metadata_size = next_i64();
        let has_object = i32::from_ne_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let store_fd_val = i32::from_ne_bytes(buf[off..off + 4].try_into().unwrap());
        Some(Reply {
            data_offset,
            metadata_offset,
            map_size,
            data_size,
            metadata_size,
            has_object,
            store_fd_val,
        })
    }
}
