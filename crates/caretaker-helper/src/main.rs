//! `caretaker-helper`: the privileged helper daemon.
//!
//! Started by launchd or systemd as root. Listens on a Unix socket and runs
//! allowlisted programs for authorized callers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use caretaker_helper::{Allowlist, CallerPolicy, HelperServer};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Caretaker privileged helper
#[derive(Parser)]
#[command(name = "caretaker-helper")]
#[command(version, about, long_about = None)]
struct Args {
    /// Socket to listen on
    #[arg(long)]
    socket: Option<PathBuf>,

    /// User id allowed to connect (repeatable)
    #[arg(long = "allow-uid")]
    allow_uids: Vec<u32>,

    /// Caller executable allowed to connect (repeatable; any when omitted)
    #[arg(long = "allow-exe")]
    allow_executables: Vec<PathBuf>,

    /// Maximum captured bytes per output stream
    #[arg(long)]
    max_output_bytes: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let defaults = caretaker_config::HelperConfig::default();
    let socket = args.socket.unwrap_or(defaults.socket_path);

    let mut policy = CallerPolicy::new().allow_uid(0);
    for uid in args.allow_uids {
        policy = policy.allow_uid(uid);
    }
    for exe in args.allow_executables {
        policy = policy.allow_executable(exe);
    }

    let mut server = HelperServer::new(policy, Allowlist::builtin());
    if let Some(bytes) = args.max_output_bytes {
        server = server.with_max_output_bytes(bytes);
    }

    let listener = HelperServer::bind(&socket)
        .with_context(|| format!("failed to bind helper socket {}", socket.display()))?;
    info!(version = env!("CARGO_PKG_VERSION"), "caretaker-helper started");

    Arc::new(server)
        .serve(listener, shutdown_signal())
        .await;

    let _ = std::fs::remove_file(&socket);
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}
