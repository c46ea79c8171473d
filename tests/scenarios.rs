// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
//! End-to-end scenarios driven over the real Unix domain socket protocol,
//! against a server running on a background thread. Mirrors the teacher's
//! `tests/test_channel.rs` style of a small per-test helper plus a set of
//! focused `#[test]` functions, adapted to drive a socket protocol instead
//! of a named-shm channel.

use std::io::Read;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nix::sys::socket::{self, ControlMessage, ControlMessageOwned, MsgFlags};

use plasma_store::object_id::ObjectId;
use plasma_store::protocol::{MessageHeader, Opcode, Reply, RequestPayload, HEADER_SIZE, REPLY_SIZE};
use plasma_store::Server;

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_socket_path() -> std::path::PathBuf {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("plasma-store-test-{}-{}.sock", std::process::id(), n))
}

/// Spawns the server on a background thread and returns a handle that
/// stops it (via the same `SIGTERM`-style flag the binary uses) when
/// dropped.
struct TestServer {
    socket_path: std::path::PathBuf,
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl TestServer {
    fn start() -> Self {
        let socket_path = unique_socket_path();
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut server = Server::bind(&socket_path).expect("bind test server");
        let shutdown_clone = shutdown.clone();
        let handle = thread::spawn(move || {
            server.run(shutdown_clone).expect("server event loop");
        });

        // Give the background thread a moment to reach poll().
        thread::sleep(Duration::from_millis(20));

        TestServer {
            socket_path,
            shutdown,
            handle: Some(handle),
        }
    }

    fn connect(&self) -> UnixStream {
        for _ in 0..50 {
            if let Ok(stream) = UnixStream::connect(&self.socket_path) {
                return stream;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("could not connect to test server at {:?}", self.socket_path);
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

fn send_request(stream: &UnixStream, opcode: i64, payload: RequestPayload) {
    let body = payload.encode();
    let header = MessageHeader {
        opcode,
        length: body.len() as i64,
    };
    let mut buf = Vec::with_capacity(HEADER_SIZE + body.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(&body);
    socket::send(stream.as_raw_fd(), &buf, MsgFlags::empty()).expect("send request");
}

fn recv_reply(stream: &UnixStream) -> (Reply, Option<OwnedFd>) {
    let mut buf = [0u8; REPLY_SIZE];
    let mut iov = [std::io::IoSliceMut::new(&mut buf)];
    let mut cmsg_space = nix::cmsg_space!(RawFd);
    let msg = socket::recvmsg::<()>(
        stream.as_raw_fd(),
        &mut iov,
        Some(&mut cmsg_space),
        MsgFlags::empty(),
    )
    .expect("recv reply");
    assert_eq!(msg.bytes, REPLY_SIZE, "short reply read");

    let mut fd = None;
    for cmsg in msg.cmsgs().expect("cmsgs") {
        if let ControlMessageOwned::ScmRights(fds) = cmsg {
            assert_eq!(fds.len(), 1);
            fd = Some(unsafe { OwnedFd::from_raw_fd(fds[0]) });
        }
    }
    (Reply::decode(&buf).unwrap(), fd)
}

fn create(stream: &UnixStream, id: ObjectId, data_size: i64, metadata_size: i64) -> (Reply, OwnedFd) {
    send_request(
        stream,
        Opcode::Create.encode(),
        RequestPayload {
            object_id: id,
            data_size,
            metadata_size,
            addr: [0; 4],
            port: 0,
        },
    );
    let (reply, fd) = recv_reply(stream);
    (reply, fd.expect("CREATE reply must carry an fd"))
}

/// SEAL produces no reply to the sealer — only to connections already
/// blocked on a `GET` for this id (spec §4.5). Nothing is read back here.
fn seal(stream: &UnixStream, id: ObjectId) {
    send_request(
        stream,
        Opcode::Seal.encode(),
        RequestPayload {
            object_id: id,
            data_size: 0,
            metadata_size: 0,
            addr: [0; 4],
            port: 0,
        },
    );
}

fn get(stream: &UnixStream, id: ObjectId) {
    send_request(
        stream,
        Opcode::Get.encode(),
        RequestPayload {
            object_id: id,
            data_size: 0,
            metadata_size: 0,
            addr: [0; 4],
            port: 0,
        },
    );
}

fn contains(stream: &UnixStream, id: ObjectId) -> bool {
    send_request(
        stream,
        Opcode::Contains.encode(),
        RequestPayload {
            object_id: id,
            data_size: 0,
            metadata_size: 0,
            addr: [0; 4],
            port: 0,
        },
    );
    let (reply, _fd) = recv_reply(stream);
    reply.has_object != 0
}

/// DELETE produces no reply at all (spec §4.5). Nothing is read back here.
fn delete(stream: &UnixStream, id: ObjectId) {
    send_request(
        stream,
        Opcode::Delete.encode(),
        RequestPayload {
            object_id: id,
            data_size: 0,
            metadata_size: 0,
            addr: [0; 4],
            port: 0,
        },
    );
}

/// mmaps `fd` at `map_size` bytes and returns the bytes at `[offset, offset+len)`.
fn read_region(fd: &OwnedFd, map_size: i64, offset: i64, len: usize) -> Vec<u8> {
    unsafe {
        let ptr = libc::mmap(
            std::ptr::null_mut(),
            map_size as usize,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd.as_raw_fd(),
            0,
        );
        assert_ne!(ptr, libc::MAP_FAILED);
        let slice = std::slice::from_raw_parts(ptr as *const u8, map_size as usize);
        let out = slice[offset as usize..offset as usize + len].to_vec();
        libc::munmap(ptr, map_size as usize);
        out
    }
}

fn write_region(fd: &OwnedFd, map_size: i64, offset: i64, bytes: &[u8]) {
    unsafe {
        let ptr = libc::mmap(
            std::ptr::null_mut(),
            map_size as usize,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd.as_raw_fd(),
            0,
        );
        assert_ne!(ptr, libc::MAP_FAILED);
        let slice = std::slice::from_raw_parts_mut(ptr as *mut u8, map_size as usize);
        slice[offset as usize..offset as usize + bytes.len()].copy_from_slice(bytes);
        libc::munmap(ptr, map_size as usize);
    }
}

fn id_of(byte: u8) -> ObjectId {
    ObjectId::from_bytes([byte; 20])
}

/// S1: create, write, seal, then contains()/get() observe the exact bytes.
#[test]
fn s1_create_write_seal_then_read_back() {
    let server = TestServer::start();
    let client = server.connect();

    let a = id_of(0xA1);
    let (create_reply, create_fd) = create(&client, a, 8, 2);
    let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
    let meta = [0xAA, 0xBB];
    write_region(&create_fd, create_reply.map_size, create_reply.data_offset, &data);
    write_region(
        &create_fd,
        create_reply.map_size,
        create_reply.metadata_offset,
        &meta,
    );

    seal(&client, a);

    assert!(contains(&client, a));

    get(&client, a);
    let (get_reply, get_fd) = recv_reply(&client);
    assert_eq!(get_reply.has_object, 1);
    assert_eq!(get_reply.data_size, 8);
    assert_eq!(get_reply.metadata_size, 2);
    let observed_data = read_region(
        &get_fd.unwrap(),
        get_reply.map_size,
        get_reply.data_offset,
        8,
    );
    assert_eq!(observed_data, data);
}

/// S2: a GET issued before the object exists blocks until a later SEAL.
#[test]
fn s2_get_before_create_unblocks_on_seal() {
    let server = TestServer::start();
    let getter = server.connect();
    let creator = server.connect();

    let b = id_of(0xB2);
    get(&getter, b);

    let (create_reply, create_fd) = create(&creator, b, 4, 0);
    write_region(
        &create_fd,
        create_reply.map_size,
        create_reply.data_offset,
        &[0xDE, 0xAD, 0xBE, 0xEF],
    );
    seal(&creator, b);

    let (get_reply, get_fd) = recv_reply(&getter);
    assert_eq!(get_reply.has_object, 1);
    let bytes = read_region(&get_fd.unwrap(), get_reply.map_size, get_reply.data_offset, 4);
    assert_eq!(bytes, [0xDE, 0xAD, 0xBE, 0xEF]);
}

/// S3: a subscriber registered before any object exists receives exactly
/// the sealed ids, in seal order, on its dedicated notification socket.
#[test]
fn s3_subscriber_receives_seals_in_order() {
    let server = TestServer::start();
    let subscriber = server.connect();
    let (notify_ours, notify_theirs) = UnixStream::pair().unwrap();

    // SUBSCRIBE header has a zero-length payload.
    let header = MessageHeader {
        opcode: Opcode::Subscribe.encode(),
        length: 0,
    };
    socket::send(subscriber.as_raw_fd(), &header.encode(), MsgFlags::empty()).unwrap();

    let fds = [notify_theirs.as_raw_fd()];
    let cmsg = [ControlMessage::ScmRights(&fds)];
    socket::sendmsg::<()>(
        subscriber.as_raw_fd(),
        &[std::io::IoSlice::new(&[0u8])],
        &cmsg,
        MsgFlags::empty(),
        None,
    )
    .expect("send subscribe fd");

    thread::sleep(Duration::from_millis(20));

    let creator = server.connect();
    let x = id_of(0x58);
    let y = id_of(0x59);
    let z = id_of(0x5A);
    for id in [x, y, z] {
        create(&creator, id, 1, 0);
        seal(&creator, id);
    }

    let mut received = Vec::new();
    let mut notify_ours = notify_ours;
    notify_ours
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let mut buf = [0u8; 60];
    let mut total = 0;
    while total < 60 {
        let n = notify_ours.read(&mut buf[total..]).expect("read notifications");
        assert!(n > 0, "notification stream closed early");
        total += n;
    }
    for chunk in buf.chunks(20) {
        received.push(ObjectId::from_slice(chunk).unwrap());
    }
    assert_eq!(received, vec![x, y, z]);
}

/// S4: two clients blocked on the same unborn object are woken in the
/// order they issued their GETs.
#[test]
fn s4_multiple_waiters_woken_in_fifo_order() {
    let server = TestServer::start();
    let first = server.connect();
    let second = server.connect();
    let creator = server.connect();

    let q = id_of(0x71);
    get(&first, q);
    thread::sleep(Duration::from_millis(5));
    get(&second, q);

    create(&creator, q, 2, 0);
    seal(&creator, q);

    let (r1, _) = recv_reply(&first);
    let (r2, _) = recv_reply(&second);
    assert_eq!(r1.has_object, 1);
    assert_eq!(r2.has_object, 1);
}

/// S5: after DELETE, CONTAINS reports absent and a new GET is pending
/// again until a fresh CREATE/SEAL of the same id.
#[test]
fn s5_delete_then_recreate_resolves_pending_get() {
    let server = TestServer::start();
    let owner = server.connect();
    let getter = server.connect();

    let k = id_of(0x4B);
    create(&owner, k, 4, 0);
    seal(&owner, k);
    assert!(contains(&owner, k));

    delete(&owner, k);
    assert!(!contains(&owner, k));

    get(&getter, k);
    thread::sleep(Duration::from_millis(20));

    create(&owner, k, 8, 1);
    seal(&owner, k);

    let (reply, _fd) = recv_reply(&getter);
    assert_eq!(reply.data_size, 8);
    assert_eq!(reply.metadata_size, 1);
}
