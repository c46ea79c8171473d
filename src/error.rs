// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
use std::io;

use thiserror::Error;

/// Recoverable, per-connection failures. A `StoreError` never aborts the
/// process — the dispatcher closes and deregisters the offending
/// connection and the event loop continues.
///
/// Programming errors (duplicate `CREATE`, `DELETE` of a non-sealed object,
/// `SUBSCRIBE` after objects exist, unknown opcode, a notification send
/// failure that isn't would-block) are not represented here: they are bugs,
/// asserted with `panic!`/`unreachable!` at the call site, matching the
/// `CHECK`/`CHECKM` macros of the implementation this store is modeled on.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error on connection: {0}")]
    Io(#[from] io::Error),

    #[error("malformed request frame: {0}")]
    Framing(&'static str),

    #[error("fd-passing failed: {0}")]
    FdPassing(&'static str),

    #[error("peer closed the connection")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, StoreError>;
