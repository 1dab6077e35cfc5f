//! The `reconcile` subcommand: runs C3's periodic reconciliation loop
//! (control-plane assignments → live `StreamAgent` subscriptions) until
//! SIGINT/SIGTERM.

use std::sync::Arc;

use base::Error;
use bpaf::Bpaf;
use core_::config::Config;
use core_::reconcile::{HttpAssignmentClient, ReconciliationEngine, ReconciliationService};
use core_::registry::AgentRegistry;
use tracing::info;

/// Runs the reconciliation engine against the control plane.
#[derive(Bpaf, Debug)]
#[bpaf(command("reconcile"))]
pub struct Args {
    /// Overrides `BACKEND_URL` for this run.
    #[bpaf(long("backend-url"), argument("URL"))]
    backend_url: Option<String>,
}

pub fn run(args: Args) -> Result<i32, Error> {
    let mut config = Config::from_env();
    if let Some(url) = args.backend_url {
        config.backend_url = url;
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| base::format_err_t!(Internal, "failed to start tokio runtime: {e}"))?;
    Ok(rt.block_on(run_async(config)))
}

async fn run_async(config: Config) -> i32 {
    let (shutdown_tx, shutdown_rx) = base::shutdown::channel();
    tokio::spawn(crate::signal::wait_then_shutdown(shutdown_tx));

    let client = Arc::new(HttpAssignmentClient::new(config.backend_url.clone()));
    let registry = Arc::new(AgentRegistry::new());
    let engine = Arc::new(ReconciliationEngine::new(client, registry));
    let service = ReconciliationService::new(engine, config.reconciliation_interval);

    info!(backend_url = %config.backend_url, "reconciliation service starting");
    service.run(shutdown_rx).await;
    0
}
