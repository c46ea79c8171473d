// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
//! Event-loop glue: binds the listening socket, accepts clients, and wires
//! read/write readiness to the dispatcher. Grounded in the `mio`
//! `Poll`/`Events`/`Token` loop shape used by the pack's cache-server
//! manifest, paired with a `slab::Slab` connection table — the standard
//! `mio` idiom for mapping readiness tokens back to per-connection state.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mio::net::{UnixListener, UnixStream};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use slab::Slab;
use tracing::{debug, info, warn};

use crate::connection::{Connection, Role};
use crate::dispatcher::{self, DispatchResult, Outbound};
use crate::error::StoreError;
use crate::framing;
use crate::object_table::ObjectTable;
use crate::protocol::Opcode;
use crate::subscriber::SubscriberRegistry;

const LISTENER: Token = Token(usize::MAX);
const POLL_TIMEOUT: Duration = Duration::from_millis(200);

pub struct Server {
    socket_path: PathBuf,
    poll: Poll,
    listener: UnixListener,
    connections: Slab<Connection>,
    table: ObjectTable,
    subscribers: SubscriberRegistry,
    /// subscriber registry key (the requesting connection's token) ->
    /// token of the dedicated notification socket it handed us.
    notify_tokens: std::collections::HashMap<usize, usize>,
    /// the inverse of `notify_tokens`, for looking up which subscriber a
    /// write-readiness event on a notification socket belongs to.
    reverse_notify: std::collections::HashMap<usize, usize>,
}

impl Server {
    pub fn bind(socket_path: impl AsRef<Path>) -> io::Result<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();
        if socket_path.exists() {
            std::fs::remove_file(&socket_path)?;
        }
        let mut listener = UnixListener::bind(&socket_path)?;
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        info!(path = %socket_path.display(), "store listening");

        Ok(Server {
            socket_path,
            poll,
            listener,
            connections: Slab::new(),
            table: ObjectTable::new(),
            subscribers: SubscriberRegistry::new(),
            notify_tokens: std::collections::HashMap::new(),
            reverse_notify: std::collections::HashMap::new(),
        })
    }

    /// Runs the event loop until `shutdown` is observed (set by the
    /// process's `SIGTERM` handler). Returns once the loop exits cleanly.
    pub fn run(&mut self, shutdown: Arc<AtomicBool>) -> io::Result<()> {
        let mut events = Events::with_capacity(128);
        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("shutdown signal observed, exiting event loop");
                break;
            }

            match self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept_all()?,
                    Token(token) => {
                        if event.is_readable() {
                            self.handle_readable(token);
                        }
                        if event.is_writable() {
                            self.handle_writable(token);
                        }
                    }
                }
            }
        }
        let _ = std::fs::remove_file(&self.socket_path);
        Ok(())
    }

    fn accept_all(&mut self) -> io::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((mut stream, _addr)) => {
                    let entry = self.connections.vacant_entry();
                    let token = entry.key();
                    self.poll
                        .registry()
                        .register(&mut stream, Token(token), Interest::READABLE)?;
                    entry.insert(Connection::new(into_std(stream)));
                    debug!(token, "client connected");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Reads at most one message per invocation (spec §4.6) — if more is
    /// buffered, the socket stays readable and mio reports it again on the
    /// next pass through the loop.
    fn handle_readable(&mut self, token: usize) {
        let raw_fd = match self.connections.get(token) {
            Some(conn) => conn.stream.as_raw_fd(),
            None => return,
        };

        if self.connections[token].role == Role::Subscriber {
            // Subscriber sockets are write-only from our side; a readable
            // event here means the client went away.
            self.teardown(token);
            return;
        }

        if self.awaiting_subscribe(token) {
            match framing::recv_byte_and_fd(raw_fd) {
                Ok(None) => {}
                Ok(Some((_byte, notify_fd))) => self.complete_subscribe(token, notify_fd),
                Err(_) => self.teardown(token),
            }
            return;
        }

        match self.connections[token].poll_read(raw_fd) {
            Ok(None) => {}
            Ok(Some((header, payload))) => {
                if Opcode::decode(header.opcode) == Opcode::Subscribe {
                    self.mark_awaiting_subscribe(token);
                    return;
                }
                if self.dispatch_and_send(token, header.opcode, &payload) {
                    self.teardown(token);
                }
            }
            Err(StoreError::Disconnected) => self.teardown(token),
            Err(e) => {
                warn!(token, error = %e, "connection error, tearing down");
                self.teardown(token);
            }
        }
    }

    fn handle_writable(&mut self, token: usize) {
        let Some(&subscriber_token) = self.reverse_notify.get(&token) else {
            return;
        };
        self.drain_subscriber(subscriber_token);
    }

    fn dispatch_and_send(&mut self, token: usize, opcode: i64, payload: &[u8]) -> bool {
        let header = crate::protocol::MessageHeader {
            opcode,
            length: payload.len() as i64,
        };
        let DispatchResult {
            reply,
            wakes,
            became_subscriber,
            disconnect,
        } = dispatcher::dispatch(header, payload, token, &mut self.table, &mut self.subscribers);

        if let Some(out) = reply {
            self.send_outbound(out);
        }
        for wake in wakes {
            self.send_outbound(wake);
        }
        // `became_subscriber` needs no reply here — the handshake (byte +
        // fd) completes on the connection's next readable event.
        let _ = became_subscriber;

        // A SEAL just enqueued notifications; drain them inline (spec §4.3
        // runs the drain both from here and from write-readiness).
        for sub_token in self.subscribers.pending_conns() {
            self.drain_subscriber(sub_token);
        }

        disconnect
    }

    fn send_outbound(&mut self, out: Outbound) {
        let Some(conn) = self.connections.get(out.conn) else {
            return;
        };
        let fd = conn.stream.as_raw_fd();
        let pass_fd = out.fd.as_ref().map(|f| f.as_raw_fd());
        if let Err(e) = framing::send_with_fd(fd, &out.payload, pass_fd) {
            warn!(token = out.conn, error = %e, "failed to send reply, tearing down connection");
            self.teardown(out.conn);
        }
    }

    fn drain_subscriber(&mut self, subscriber_conn_token: usize) {
        let Some(&notify_token) = self.notify_tokens.get(&subscriber_conn_token) else {
            return;
        };
        let Some(conn) = self.connections.get(notify_token) else {
            return;
        };
        let fd = conn.stream.as_raw_fd();
        match self.subscribers.drain(subscriber_conn_token, fd) {
            Ok(_empty) => {}
            Err(e) => warn!(token = notify_token, error = %e, "subscriber drain failed"),
        }
    }

    fn awaiting_subscribe(&self, token: usize) -> bool {
        self.connections
            .get(token)
            .map(|c| c.awaiting_subscribe)
            .unwrap_or(false)
    }

    fn mark_awaiting_subscribe(&mut self, token: usize) {
        if let Some(conn) = self.connections.get_mut(token) {
            conn.awaiting_subscribe = true;
        }
    }

    fn complete_subscribe(&mut self, token: usize, notify_fd: std::os::fd::OwnedFd) {
        if let Some(conn) = self.connections.get_mut(token) {
            conn.awaiting_subscribe = false;
        }

        let notify_std: StdUnixStream = notify_fd.into();
        notify_std.set_nonblocking(true).ok();
        let mut notify_mio = UnixStream::from_std(notify_std);

        let entry = self.connections.vacant_entry();
        let notify_token = entry.key();
        if self
            .poll
            .registry()
            .register(&mut notify_mio, Token(notify_token), Interest::WRITABLE)
            .is_err()
        {
            return;
        }
        let mut notify_conn = Connection::new(into_std(notify_mio));
        notify_conn.role = Role::Subscriber;
        entry.insert(notify_conn);

        dispatcher::dispatch(
            crate::protocol::MessageHeader {
                opcode: Opcode::Subscribe.encode(),
                length: 0,
            },
            &[],
            token,
            &mut self.table,
            &mut self.subscribers,
        );
        self.notify_tokens.insert(token, notify_token);
        self.reverse_notify.insert(notify_token, token);
        info!(token, notify_token, "subscription handshake complete");
    }

    fn teardown(&mut self, token: usize) {
        if let Some(conn) = self.connections.try_remove(token) {
            let raw_fd = conn.stream.as_raw_fd();
            let _ = self.poll.registry().deregister(&mut SourceFd(&raw_fd));
        }
        self.table.scrub_waiter(token);
        self.subscribers.unregister(token);
        if let Some(notify_token) = self.notify_tokens.remove(&token) {
            self.reverse_notify.remove(&notify_token);
            if let Some(notify_conn) = self.connections.try_remove(notify_token) {
                let raw_fd = notify_conn.stream.as_raw_fd();
                let _ = self.poll.registry().deregister(&mut SourceFd(&raw_fd));
            }
        }
        debug!(token, "connection torn down");
    }
}

fn into_std(stream: UnixStream) -> StdUnixStream {
    // mio::net::UnixStream has no safe owned conversion back to std; the
    // underlying fd is the same socket either way, so we reconstruct via
    // the raw fd and forget the mio wrapper to avoid a double-close.
    let fd = stream.as_raw_fd();
    std::mem::forget(stream);
    unsafe { StdUnixStream::from_raw_fd(fd) }
}
