// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
//! Subscription registry and notification drain.
//!
//! The drain loop's backpressure handling is grounded in the pack's
//! `TcpStream` (`send_backlog: VecDeque<Vec<u8>>` / `writable_armed: bool`)
//! reference file: queue what can't be sent now, stop at the first
//! would-block, and only re-arm write-readiness while the queue is
//! non-empty.

use std::collections::{HashMap, VecDeque};
use std::os::fd::RawFd;

use tracing::debug;

use crate::error::{Result, StoreError};
use crate::framing;
use crate::object_id::ObjectId;
use crate::protocol::NOTIFICATION_FRAME_SIZE;

pub struct SubscriberRegistry {
    /// connection token -> queued, not-yet-sent object ids.
    queues: HashMap<usize, VecDeque<ObjectId>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        SubscriberRegistry {
            queues: HashMap::new(),
        }
    }

    pub fn register(&mut self, conn: usize) {
        assert!(
            self.queues.insert(conn, VecDeque::new()).is_none(),
            "connection subscribed twice: {conn}"
        );
    }

    pub fn is_subscriber(&self, conn: usize) -> bool {
        self.queues.contains_key(&conn)
    }

    pub fn unregister(&mut self, conn: usize) {
        self.queues.remove(&conn);
    }

    /// Appends `id` to every subscriber's queue. Called once per seal,
    /// before the drain is attempted (spec §4.1, §4.3).
    pub fn enqueue_all(&mut self, id: ObjectId) {
        for queue in self.queues.values_mut() {
            queue.push_back(id);
        }
    }

    /// Returns the connection tokens whose queue is non-empty, for the
    /// caller to attempt a drain against (inline right after a seal, or
    /// from a write-readiness callback).
    pub fn pending_conns(&self) -> Vec<usize> {
        self.queues
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(&c, _)| c)
            .collect()
    }

    /// Drains as many queued notifications as possible onto `fd` without
    /// blocking. Stops at the first short/would-block send, leaving the
    /// remainder queued. Returns `true` if the queue is now empty (the
    /// caller should disarm write-readiness interest for this
    /// connection); any send failure other than would-block is fatal
    /// (spec §4.3, §7).
    pub fn drain(&mut self, conn: usize, fd: RawFd) -> Result<bool> {
        let queue = self
            .queues
            .get_mut(&conn)
            .ok_or(StoreError::Framing("drain on an unregistered subscriber"))?;

        while let Some(&id) = queue.front() {
            let frame = *id.as_bytes();
            debug_assert_eq!(frame.len(), NOTIFICATION_FRAME_SIZE);
            match framing::try_send(fd, &frame) {
                Ok(n) if n == frame.len() => {
                    queue.pop_front();
                }
                Ok(0) => break,
                Ok(_) => {
                    panic!("partial notification frame write — framing invariant violated")
                }
                Err(StoreError::Io(e)) => {
                    panic!("fatal I/O error draining subscriber {conn}: {e}")
                }
                Err(e) => return Err(e),
            }
        }

        let empty = queue.is_empty();
        debug!(conn, empty, "subscriber drain");
        Ok(empty)
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}
