// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
//! Request dispatcher: decodes one message, mutates the object table and
//! subscriber registry, and describes the replies the event loop needs to
//! send — including the fan-out to waiters that a `SEAL` triggers.

use std::os::fd::OwnedFd;

use tracing::{debug, error, info};

use crate::allocator;
use crate::object_table::{GetOutcome, ObjectTable};
use crate::protocol::{MessageHeader, Opcode, Reply, RequestPayload};
use crate::subscriber::SubscriberRegistry;

/// One reply the event loop must send: to `conn`, this payload, optionally
/// with an fd attached via `SCM_RIGHTS`.
pub struct Outbound {
    pub conn: usize,
    pub payload: Vec<u8>,
    pub fd: Option<OwnedFd>,
}

/// Everything that resulted from handling one message.
#[derive(Default)]
pub struct DispatchResult {
    /// Direct reply to the requester, if the opcode produces one. `GET`
    /// produces no direct reply when the object isn't sealed yet — the
    /// connection instead receives its reply later, as part of `wakes`.
    pub reply: Option<Outbound>,
    /// Replies fanned out to connections that were waiting on a `SEAL`.
    pub wakes: Vec<Outbound>,
    /// Set once the `SUBSCRIBE` handshake has completed for `conn` — the
    /// caller should flip the connection's role and stop treating it as a
    /// request/reply client.
    pub became_subscriber: bool,
    /// The store observed `DISCONNECT` or EOF; the caller should tear the
    /// connection down and scrub it from the waiter/subscriber registries.
    pub disconnect: bool,
}

fn reply_with_handle(handle: crate::object_table::ObjectHandle) -> (Reply, Option<OwnedFd>) {
    let fd = allocator::dup_raw_fd(handle.store_fd).expect("failed to dup object region fd");
    let reply = Reply {
        data_offset: handle.data_offset,
        metadata_offset: handle.metadata_offset,
        map_size: handle.map_size,
        data_size: handle.data_size,
        metadata_size: handle.metadata_size,
        has_object: 1,
        store_fd_val: handle.store_fd,
    };
    (reply, Some(fd))
}

/// Dispatches one fully-received message. `conn` identifies the connection
/// the message arrived on, used to register it as a waiter or subscriber.
pub fn dispatch(
    header: MessageHeader,
    payload: &[u8],
    conn: usize,
    table: &mut ObjectTable,
    subs: &mut SubscriberRegistry,
) -> DispatchResult {
    let opcode = Opcode::decode(header.opcode);
    debug!(conn, ?opcode, "dispatching request");

    match opcode {
        Opcode::Create => {
            let req = RequestPayload::decode(payload).expect("malformed CREATE payload");
            let handle = table.create(req.object_id, req.data_size, req.metadata_size);
            let (reply, fd) = reply_with_handle(handle);
            DispatchResult {
                reply: Some(Outbound {
                    conn,
                    payload: reply.encode().to_vec(),
                    fd,
                }),
                ..Default::default()
            }
        }

        Opcode::Get => {
            let req = RequestPayload::decode(payload).expect("malformed GET payload");
            match table.get(req.object_id, conn) {
                GetOutcome::Found(handle) => {
                    let (reply, fd) = reply_with_handle(handle);
                    DispatchResult {
                        reply: Some(Outbound {
                            conn,
                            payload: reply.encode().to_vec(),
                            fd,
                        }),
                        ..Default::default()
                    }
                }
                GetOutcome::Pending => {
                    debug!(conn, object_id = ?req.object_id, "GET pending, connection enrolled as waiter");
                    DispatchResult::default()
                }
            }
        }

        Opcode::Contains => {
            let req = RequestPayload::decode(payload).expect("malformed CONTAINS payload");
            let present = table.contains(req.object_id);
            let reply = Reply {
                has_object: present as i32,
                ..Reply::not_found()
            };
            DispatchResult {
                reply: Some(Outbound {
                    conn,
                    payload: reply.encode().to_vec(),
                    fd: None,
                }),
                ..Default::default()
            }
        }

        Opcode::Seal => {
            let req = RequestPayload::decode(payload).expect("malformed SEAL payload");
            let mut result = DispatchResult::default();
            if let Some((handle, waiters)) = table.seal(req.object_id) {
                subs.enqueue_all(req.object_id);
                for waiter_conn in waiters {
                    let (reply, fd) = reply_with_handle(handle);
                    result.wakes.push(Outbound {
                        conn: waiter_conn,
                        payload: reply.encode().to_vec(),
                        fd,
                    });
                }
            } else {
                debug!(object_id = ?req.object_id, "SEAL of unknown id, silent no-op");
            }
            result
        }

        Opcode::Delete => {
            let req = RequestPayload::decode(payload).expect("malformed DELETE payload");
            table.delete(req.object_id);
            DispatchResult::default()
        }

        Opcode::Subscribe => {
            assert!(
                table.is_empty(),
                "SUBSCRIBE is only valid while no objects exist"
            );
            subs.register(conn);
            info!(conn, "client subscribed to notifications");
            DispatchResult {
                became_subscriber: true,
                ..Default::default()
            }
        }

        Opcode::Disconnect => DispatchResult {
            disconnect: true,
            ..Default::default()
        },

        Opcode::Transfer | Opcode::Data => {
            error!(?opcode, "opcode is wire-defined but not implemented locally");
            unreachable!("TRANSFER/DATA are not supported by a single-node store");
        }
    }
}
