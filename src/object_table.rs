// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
//! The object table: the open/sealed lifecycle and the wait registry.
//!
//! Grounded in `plasma_store.c`'s `open_objects`/`sealed_objects` uthash
//! tables and `service_registry.rs`'s entry-table idiom, but as plain
//! `HashMap`s rather than a shared, locked, fixed-capacity array: the table
//! is only ever touched from the single event-loop thread (spec §5), so
//! none of `service_registry.rs`'s spinlock-protected shared-memory
//! machinery is needed here.

use std::collections::{HashMap, VecDeque};
use std::os::fd::RawFd;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::allocator::{self, Region};
use crate::object_id::ObjectId;

/// Per-object bookkeeping independent of lifecycle state.
#[derive(Debug, Clone, Copy)]
pub struct ObjectInfo {
    pub data_size: i64,
    pub metadata_size: i64,
    pub create_time: i64,
    pub construct_duration: i64,
}

/// The authoritative record for a live object, open or sealed.
pub struct ObjectEntry {
    pub info: ObjectInfo,
    region: Region,
}

/// What a client needs to `mmap` and locate an object's bytes. `store_fd`
/// is filled in by the dispatcher after duplicating the region's fd for
/// ancillary transmission — the table itself only ever hands out the raw
/// fd value for bookkeeping, never ownership.
#[derive(Debug, Clone, Copy)]
pub struct ObjectHandle {
    pub store_fd: RawFd,
    pub map_size: i64,
    pub data_offset: i64,
    pub metadata_offset: i64,
    pub data_size: i64,
    pub metadata_size: i64,
}

fn handle_of(entry: &ObjectEntry) -> ObjectHandle {
    ObjectHandle {
        store_fd: entry.region.raw_fd(),
        map_size: entry.region.len() as i64,
        data_offset: 0,
        metadata_offset: entry.info.data_size,
        data_size: entry.info.data_size,
        metadata_size: entry.info.metadata_size,
    }
}

/// Result of a `GET` lookup: either the object is already sealed and ready,
/// or the caller has been enrolled as a waiter and will be woken at seal
/// time (spec §4.2).
pub enum GetOutcome {
    Found(ObjectHandle),
    Pending,
}

pub struct ObjectTable {
    open: HashMap<ObjectId, ObjectEntry>,
    sealed: HashMap<ObjectId, ObjectEntry>,
    /// WaitEntry registry: one FIFO of connection tokens per pending id.
    waiters: HashMap<ObjectId, VecDeque<usize>>,
}

impl ObjectTable {
    pub fn new() -> Self {
        ObjectTable {
            open: HashMap::new(),
            sealed: HashMap::new(),
            waiters: HashMap::new(),
        }
    }

    /// Reserves a new object buffer. Fatal if `id` is already known in
    /// either table — a client is never allowed to `CREATE` the same id
    /// twice (invariant 1).
    pub fn create(&mut self, id: ObjectId, data_size: i64, metadata_size: i64) -> ObjectHandle {
        assert!(
            !self.open.contains_key(&id) && !self.sealed.contains_key(&id),
            "CREATE of an object id that already exists: {id:?}"
        );
        assert!(data_size >= 0 && metadata_size >= 0, "negative object size");

        let total = (data_size + metadata_size) as usize;
        let region = allocator::allocate(total).expect("failed to allocate object region");

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;

        let entry = ObjectEntry {
            info: ObjectInfo {
                data_size,
                metadata_size,
                create_time: now,
                construct_duration: -1,
            },
            region,
        };
        let handle = handle_of(&entry);
        debug!(?id, data_size, metadata_size, "object created");
        self.open.insert(id, entry);
        handle
    }

    /// Looks up a sealed object, or enrolls `conn` as a waiter if the id is
    /// either open or unknown (invariant 2: a wait entry never exists for a
    /// sealed id).
    pub fn get(&mut self, id: ObjectId, conn: usize) -> GetOutcome {
        if let Some(entry) = self.sealed.get(&id) {
            return GetOutcome::Found(handle_of(entry));
        }
        self.waiters.entry(id).or_default().push_back(conn);
        GetOutcome::Pending
    }

    /// `true` only once the object is sealed — an open, write-in-progress
    /// object is not yet visible to other clients.
    pub fn contains(&self, id: ObjectId) -> bool {
        self.sealed.contains_key(&id)
    }

    /// Moves an object from open to sealed and returns its handle plus the
    /// FIFO-ordered list of connections blocked on it. A `SEAL` of an
    /// unknown id is a silent no-op (preserved from the original
    /// implementation; see the TODO in `plasma_store.c`), returning `None`.
    pub fn seal(&mut self, id: ObjectId) -> Option<(ObjectHandle, Vec<usize>)> {
        let mut entry = self.open.remove(&id)?;
        entry.info.construct_duration = 0;
        let handle = handle_of(&entry);
        self.sealed.insert(id, entry);
        let waiters = self.waiters.remove(&id).map(Vec::from).unwrap_or_default();
        debug!(?id, waiters = waiters.len(), "object sealed");
        Some((handle, waiters))
    }

    /// Fatal if `id` is not sealed — deleting a non-sealed (or unknown)
    /// object is a programming error (spec §7), mirroring `CHECKM` in the
    /// original `delete_object`.
    pub fn delete(&mut self, id: ObjectId) {
        let entry = self
            .sealed
            .remove(&id)
            .unwrap_or_else(|| panic!("DELETE of an object that is not sealed: {id:?}"));
        drop(entry);
        debug!(?id, "object deleted");
    }

    /// `true` only while there are no objects in either state — the
    /// precondition for registering a new subscriber (spec §4.4,
    /// invariant 4).
    pub fn is_empty(&self) -> bool {
        self.open.is_empty() && self.sealed.is_empty()
    }

    /// Removes `conn` from every waiter list. Called on client disconnect
    /// so a dead connection is never woken or written to (spec §4.7,
    /// resolved per the REDESIGN note in SPEC_FULL.md rather than left as
    /// a latent crash risk).
    pub fn scrub_waiter(&mut self, conn: usize) {
        self.waiters.retain(|_, list| {
            list.retain(|&c| c != conn);
            !list.is_empty()
        });
    }
}

impl Default for ObjectTable {
    fn default() -> Self {
        Self::new()
    }
}
