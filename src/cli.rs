// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
//! Command-line parsing. Grounded in `clap`'s derive API, the same crate
//! and style used by the pack's `rpcbind` binaries.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "plasma-store", about = "Local shared-memory object store")]
pub struct Args {
    /// Path of the Unix domain socket to listen on.
    #[arg(short = 's', long = "socket")]
    pub socket: PathBuf,

    /// Overrides the `STORE_LOG` environment variable for this run.
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,
}
