// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
//! Server entry point: parses CLI flags, initializes logging, binds the
//! listening socket, installs the `SIGTERM` handler, and runs the event
//! loop until shutdown.

use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use plasma_store::cli::Args;
use plasma_store::Server;

fn init_logging(level_override: Option<&str>) {
    let filter = level_override
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::try_from_env("STORE_LOG").unwrap_or_else(|_| EnvFilter::new("info")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.log_level.as_deref());

    let shutdown = Arc::new(AtomicBool::new(false));
    if let Err(e) = signal_hook::flag::register(signal_hook::consts::SIGTERM, shutdown.clone()) {
        error!("failed to install SIGTERM handler: {e}");
        return ExitCode::FAILURE;
    }

    let mut server = match Server::bind(&args.socket) {
        Ok(server) => server,
        Err(e) => {
            error!(path = %args.socket.display(), "failed to bind store socket: {e}");
            return ExitCode::FAILURE;
        }
    };

    match server.run(shutdown) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("event loop exited with error: {e}");
            ExitCode::FAILURE
        }
    }
}
