//! The heartbeat daemon: a genuine OS thread — not a tokio task — that
//! periodically writes a JSON liveness file for one model container. It
//! keeps running independent of whatever async runtime the rest of the
//! container does or doesn't use, and shutdown does not join it.
//!
//! Uses the same write-to-temp-then-rename pattern as `export.rs` for the
//! same atomic-publish need.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::warn;

use crate::container::handler::InferenceHandler;

#[derive(Serialize)]
struct HeartbeatMetrics {
    total_requests: u64,
    total_errors: u64,
    avg_latency_ms: f64,
    uptime_seconds: u64,
}

#[derive(Serialize)]
struct HeartbeatPayload {
    model_id: String,
    timestamp: String,
    status: &'static str,
    metrics: HeartbeatMetrics,
}

/// Owns the stop flag for one heartbeat thread. Dropping this without
/// calling `stop()` leaves the thread running as a daemon: it does not
/// block shutdown and is never joined.
pub struct HeartbeatHandle {
    stop: Arc<AtomicBool>,
}

impl HeartbeatHandle {
    /// Signals the thread to stop on its next wake. Does not wait for it.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Spawns the heartbeat thread for `model_id`, writing to `path` every
/// `interval`. The handler is only read from (`get_metrics`), never
/// mutated.
pub fn spawn(
    model_id: String,
    path: PathBuf,
    interval: Duration,
    handler: Arc<InferenceHandler>,
) -> HeartbeatHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_for_thread = stop.clone();
    let started_at = Instant::now();

    std::thread::Builder::new()
        .name(format!("vas-heartbeat-{model_id}"))
        .spawn(move || {
            while !stop_for_thread.load(Ordering::Relaxed) {
                write_once(&model_id, &path, &handler, started_at);
                std::thread::sleep(interval);
            }
        })
        .expect("failed to spawn heartbeat thread");

    HeartbeatHandle { stop }
}

fn write_once(model_id: &str, path: &Path, handler: &InferenceHandler, started_at: Instant) {
    let metrics = handler.get_metrics();
    let payload = HeartbeatPayload {
        model_id: model_id.to_string(),
        timestamp: iso8601_now(),
        status: "healthy",
        metrics: HeartbeatMetrics {
            total_requests: metrics.total_requests,
            total_errors: metrics.total_errors,
            avg_latency_ms: metrics.avg_latency_ms,
            uptime_seconds: started_at.elapsed().as_secs(),
        },
    };
    let Ok(json) = serde_json::to_vec(&payload) else {
        warn!(model_id, "failed to serialize heartbeat payload");
        return;
    };
    write_atomic(path, &json);
}

fn iso8601_now() -> String {
    jiff::Timestamp::now()
        .strftime("%Y-%m-%dT%H:%M:%S.%3fZ")
        .to_string()
}

fn write_atomic(path: &Path, contents: &[u8]) {
    let tmp_path = path.with_extension("tmp");
    let result = (|| -> std::io::Result<()> {
        let mut f = fs::File::create(&tmp_path)?;
        f.write_all(contents)?;
        f.sync_all()?;
        drop(f);
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();
    if let Err(e) = result {
        warn!(path = %path.display(), err = %e, "failed to write heartbeat file");
        let _ = fs::remove_file(&tmp_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::gpu::Device;
    use crate::container::handler::PlaceholderRuntime;
    use crate::container::manifest::{ModelManifest, ResourceRequirements};
    use crate::model::ModelType;

    fn manifest() -> ModelManifest {
        ModelManifest {
            model_id: "yolo-v8".to_string(),
            model_name: "YOLOv8".to_string(),
            model_version: "1.0".to_string(),
            description: None,
            author: None,
            license: None,
            supported_tasks: vec![],
            expected_resolution: (4, 2),
            resource_requirements: ResourceRequirements { gpu_required: false, gpu_memory_mb: None, cpu_fallback_allowed: false },
            model_type: ModelType::Onnx,
            model_weights: PathBuf::from("weights.onnx"),
            confidence_threshold: 0.5,
            nms_iou_threshold: None,
            output_schema: None,
        }
    }

    #[test]
    fn write_once_produces_parseable_heartbeat() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vas_heartbeat_yolo-v8.json");
        let handler = Arc::new(InferenceHandler::new(&manifest(), Device::Cpu, Arc::new(PlaceholderRuntime)));
        write_once("yolo-v8", &path, &handler, Instant::now());

        let contents = fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed["model_id"], "yolo-v8");
        assert_eq!(parsed["status"], "healthy");
        assert!(parsed["timestamp"].as_str().unwrap().ends_with('Z'));
        assert_eq!(parsed["metrics"]["total_requests"], 0);
    }

    #[test]
    fn spawned_thread_writes_and_stops() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vas_heartbeat_yolo-v8.json");
        let handler = Arc::new(InferenceHandler::new(&manifest(), Device::Cpu, Arc::new(PlaceholderRuntime)));
        let handle = spawn("yolo-v8".to_string(), path.clone(), Duration::from_millis(20), handler);

        // Give the thread a couple of cycles to write, then stop it.
        std::thread::sleep(Duration::from_millis(80));
        handle.stop();
        std::thread::sleep(Duration::from_millis(40));

        assert!(path.exists());
    }
}
