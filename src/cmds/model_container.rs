//! The `model-container` subcommand: runs one long-lived C4 model
//! container process for a single `model_id` — discovers its manifest,
//! enforces GPU requirements, then serves the length-prefixed JSON-over-UDS
//! protocol while writing a heartbeat file, until SIGINT/SIGTERM.

use std::path::Path;
use std::sync::Arc;

use base::Error;
use bpaf::Bpaf;
use core_::config::Config;
use core_::container::gpu;
use core_::container::handler::{InferenceHandler, PlaceholderRuntime};
use core_::container::{heartbeat, ipc, manifest};
use tracing::{error, info};

/// Runs one model container process for `model_id`.
#[derive(Bpaf, Debug)]
#[bpaf(command("model-container"))]
pub struct Args {
    /// The `model_id` to load; must match a manifest under `VAS_MODELS_DIR`.
    #[bpaf(long("model-id"), argument("MODEL_ID"))]
    model_id: String,
}

pub fn run(args: Args) -> Result<i32, Error> {
    let config = Config::from_env();
    run_with_models_dir(args, &config, Path::new(&config.models_dir))
}

/// The testable core of `run`: takes `models_dir` explicitly so tests don't
/// need to race on the process-wide `VAS_MODELS_DIR` environment variable.
fn run_with_models_dir(args: Args, config: &Config, models_dir: &Path) -> Result<i32, Error> {
    let manifests = manifest::discover(models_dir);
    let Some(found) = manifest::select(&manifests, &args.model_id) else {
        error!(
            model_id = %args.model_id,
            models_dir = %models_dir.display(),
            "model not found among discovered manifests",
        );
        return Ok(1);
    };
    let manifest = found.clone();

    let gpu_available = gpu::gpu_available(config.force_gpu);
    let device = match gpu::enforce(&manifest.resource_requirements, gpu_available) {
        Ok(d) => d,
        Err(e) => {
            error!(model_id = %manifest.model_id, err = %e.chain(), "GPU enforcement failed");
            return Ok(1);
        }
    };
    info!(model_id = %manifest.model_id, device = device.as_str(), "model container starting");

    let handler = Arc::new(InferenceHandler::new(&manifest, device, Arc::new(PlaceholderRuntime)));

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| base::format_err_t!(Internal, "failed to start tokio runtime: {e}"))?;
    Ok(rt.block_on(run_async(config.clone(), manifest.model_id.clone(), handler)))
}

async fn run_async(config: Config, model_id: String, handler: Arc<InferenceHandler>) -> i32 {
    let (shutdown_tx, shutdown_rx) = base::shutdown::channel();
    tokio::spawn(crate::signal::wait_then_shutdown(shutdown_tx));

    let heartbeat_handle = heartbeat::spawn(
        model_id.clone(),
        config.heartbeat_path(&model_id),
        config.heartbeat_interval,
        handler.clone(),
    );

    let socket_path = config.socket_path(&model_id);
    let (server, listener) = match ipc::IpcServer::bind(&socket_path).await {
        Ok(pair) => pair,
        Err(e) => {
            error!(path = %socket_path.display(), err = %e, "failed to bind IPC socket");
            heartbeat_handle.stop();
            return 1;
        }
    };

    let handler_for_ipc = handler.clone();
    server
        .serve(listener, Arc::new(move |bytes: &[u8]| handler_for_ipc.handle_bytes(bytes)), shutdown_rx)
        .await;

    heartbeat_handle.stop();
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tracing_test::traced_test]
    #[test]
    fn run_logs_and_exits_one_when_model_not_found() {
        let models_dir = tempfile::tempdir().unwrap();
        let args = Args { model_id: "does-not-exist".to_string() };
        let rv = run_with_models_dir(args, &Config::default(), models_dir.path());
        assert_eq!(rv.unwrap(), 1);
        assert!(logs_contain("model not found among discovered manifests"));
    }
}
