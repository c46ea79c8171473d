// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
//! Suballocator adapter.
//!
//! The object table needs more than a heap pointer: every live object must
//! be traceable back to `(fd, map_size, offset)` so the handle returned to
//! clients can be mmap'd by them directly. A naive `Vec<u8>` allocation has
//! no such identity. This adapter creates one anonymous, shareable memory
//! region per object via `memfd_create` + `mmap`, so the identity is exact
//! and trivial: `offset` is always `0`, `map_size` is the full region.
//!
//! Grounded in the teacher's raw-syscall style in `platform/posix.rs`
//! (`shm_open`/`mmap`/`ftruncate`) and the free-list bookkeeping idiom of
//! `chunk_storage.rs`, simplified here because each region backs exactly one
//! object for its whole lifetime — there is no sub-region reuse to track.

use std::ffi::CString;
use std::io;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::ptr;

/// A single anonymous, `mmap`-shared memory region backing one object.
pub struct Region {
    fd: OwnedFd,
    ptr: *mut u8,
    len: usize,
}

// The mapping is only ever touched from the single-threaded event loop that
// owns the `ObjectTable`; `Region` is moved between collections, never
// shared across threads.
unsafe impl Send for Region {}

impl Region {
    pub fn raw_fd(&self) -> RawFd {
        use std::os::fd::AsRawFd;
        self.fd.as_raw_fd()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr
    }

    /// The full backing buffer as a byte slice: data followed by metadata.
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if self.len > 0 {
            unsafe {
                libc::munmap(self.ptr as *mut libc::c_void, self.len);
            }
        }
    }
}

/// Creates a new anonymous shared region of `len` bytes, backed by a
/// `memfd`, mapped `MAP_SHARED` so the owning process and every client that
/// receives the duplicated fd observe the same bytes.
pub fn allocate(len: usize) -> io::Result<Region> {
    if len == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "cannot allocate a zero-length object",
        ));
    }

    let name = CString::new("plasma-object").unwrap();
    let raw_fd = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC) };
    if raw_fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(raw_fd) };

    let rc = unsafe { libc::ftruncate(raw_fd, len as libc::off_t) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            raw_fd,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }

    Ok(Region {
        fd,
        ptr: ptr as *mut u8,
        len,
    })
}

/// Duplicates a region's fd so it can be handed to a client via
/// `SCM_RIGHTS` without losing our own mapping when the client closes its
/// copy. Takes a raw fd (rather than `&Region`) so the object table can
/// call this against a handle's `store_fd` without exposing `Region`
/// itself outside this module.
pub fn dup_raw_fd(fd: RawFd) -> io::Result<OwnedFd> {
    let dup = unsafe { libc::dup(fd) };
    if dup < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(dup) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocated_region_is_readable_and_writable() {
        let mut region = allocate(64).expect("allocate");
        assert_eq!(region.len(), 64);
        region.as_mut_slice()[0] = 0xAB;
        assert_eq!(region.as_slice()[0], 0xAB);
    }

    #[test]
    fn zero_length_is_rejected() {
        assert!(allocate(0).is_err());
    }

    #[test]
    fn duplicated_fd_is_distinct_but_maps_same_memory() {
        let region = allocate(16).expect("allocate");
        let dup = dup_raw_fd(region.raw_fd()).expect("dup");
        use std::os::fd::AsRawFd;
        assert_ne!(dup.as_raw_fd(), region.raw_fd());
    }
}
