//! SIGTERM/SIGINT handling shared by the long-lived daemon subcommands
//! (§4.3's "Cancellation and timeouts": "The model container's stop is
//! signaled by SIGTERM/SIGINT handlers").
//!
//! Grounded on the teacher's `run` command, which races
//! `SignalKind::interrupt()` against `SignalKind::terminate()` the same
//! way; re-expressed here to drop a `base::shutdown::Sender` instead of
//! firing a `oneshot` channel, since every long-running service in this
//! crate already consumes a `base::shutdown::Receiver`.

use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

/// Waits for SIGINT or SIGTERM, then drops `shutdown_tx` to wake every
/// `base::shutdown::Receiver` derived from it.
pub async fn wait_then_shutdown(shutdown_tx: base::shutdown::Sender) {
    let mut int = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = int.recv() => info!("received SIGINT"),
        _ = term.recv() => info!("received SIGTERM"),
    }
    drop(shutdown_tx);
}
