//! Control-plane-side health aggregation (§4.4.7): a read-only service
//! that scans heartbeat files and, when an `AgentRegistry` is colocated
//! in-process, reports camera-side metrics alongside them. Every
//! operation here is best-effort and swallows its own errors, per §7.
//!
//! Grounded on `container::manifest::discover`'s directory-scan style
//! (one-shot `read_dir` + per-entry `flatten()`) and on this crate's
//! registry/agent types for the colocated-camera-metrics path.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use jiff::Timestamp;
use serde::Serialize;

use crate::registry::AgentRegistry;

/// How long since its last write a heartbeat may be before it's
/// considered stale (§4.4.7).
const STALE_AFTER: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelHealth {
    Healthy,
    Degraded,
    Unknown,
}

#[derive(Clone, Debug, Serialize)]
pub struct ModelHealthReport {
    pub model_id: String,
    pub health: ModelHealth,
    pub total_requests: Option<u64>,
    pub total_errors: Option<u64>,
    pub avg_latency_ms: Option<f64>,
}

#[derive(serde::Deserialize)]
struct HeartbeatFile {
    timestamp: String,
    metrics: HeartbeatFileMetrics,
}

#[derive(serde::Deserialize)]
struct HeartbeatFileMetrics {
    total_requests: u64,
    total_errors: u64,
    avg_latency_ms: f64,
}

/// Scans `socket_dir` for `vas_heartbeat_*.json` files and classifies
/// each. A file that's missing, unreadable, or unparsable yields
/// `ModelHealth::Unknown` with no metrics rather than being omitted, so
/// callers can still see that a model id was expected.
pub fn scan_heartbeats(socket_dir: &Path) -> Vec<ModelHealthReport> {
    let mut reports = Vec::new();
    let entries = match std::fs::read_dir(socket_dir) {
        Ok(e) => e,
        Err(_) => return reports,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(model_id) = model_id_from_heartbeat_path(&path) else {
            continue;
        };
        reports.push(classify_one(&model_id, &path));
    }
    reports
}

fn model_id_from_heartbeat_path(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let stripped = name.strip_prefix("vas_heartbeat_")?.strip_suffix(".json")?;
    Some(stripped.to_string())
}

fn classify_one(model_id: &str, path: &Path) -> ModelHealthReport {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return unknown(model_id),
    };
    let parsed: HeartbeatFile = match serde_json::from_str(&contents) {
        Ok(p) => p,
        Err(_) => return unknown(model_id),
    };
    let Ok(ts) = parsed.timestamp.parse::<Timestamp>() else {
        return unknown(model_id);
    };
    let age = Timestamp::now().since(ts).map(|d| d.get_seconds()).unwrap_or(i64::MAX);
    let health = if age >= 0 && (age as u64) < STALE_AFTER.as_secs() {
        ModelHealth::Healthy
    } else {
        ModelHealth::Degraded
    };
    ModelHealthReport {
        model_id: model_id.to_string(),
        health,
        total_requests: Some(parsed.metrics.total_requests),
        total_errors: Some(parsed.metrics.total_errors),
        avg_latency_ms: Some(parsed.metrics.avg_latency_ms),
    }
}

fn unknown(model_id: &str) -> ModelHealthReport {
    ModelHealthReport {
        model_id: model_id.to_string(),
        health: ModelHealth::Unknown,
        total_requests: None,
        total_errors: None,
        avg_latency_ms: None,
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CameraHealthReport {
    pub camera_id: String,
    pub state: String,
    pub subscription_count: usize,
}

/// Per-camera metrics from a colocated `AgentRegistry`, or `None` when no
/// registry is colocated in-process (§4.4.7: "otherwise the camera
/// endpoints return 'not integrated' indicators").
pub fn camera_reports(registry: Option<&Arc<AgentRegistry>>) -> Option<Vec<CameraHealthReport>> {
    let registry = registry?;
    Some(
        registry
            .list_agents()
            .iter()
            .map(|a| {
                let agent = a.lock();
                CameraHealthReport {
                    camera_id: agent.camera_id().to_string(),
                    state: format!("{:?}", agent.state()),
                    subscription_count: agent.subscription_count(),
                }
            })
            .collect(),
    )
}

pub fn heartbeat_path_for(socket_dir: &Path, model_id: &str) -> PathBuf {
    socket_dir.join(format!("vas_heartbeat_{model_id}.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::SubscriptionConfig;

    fn write_heartbeat(dir: &Path, model_id: &str, timestamp: &str, total_requests: u64) {
        let path = heartbeat_path_for(dir, model_id);
        let body = serde_json::json!({
            "model_id": model_id,
            "timestamp": timestamp,
            "status": "healthy",
            "metrics": {"total_requests": total_requests, "total_errors": 0, "avg_latency_ms": 1.0, "uptime_seconds": 10}
        });
        std::fs::write(path, serde_json::to_vec(&body).unwrap()).unwrap();
    }

    #[test]
    fn fresh_heartbeat_is_healthy() {
        let tmp = tempfile::tempdir().unwrap();
        let now = Timestamp::now().to_string();
        write_heartbeat(tmp.path(), "m1", &now, 5);
        let reports = scan_heartbeats(tmp.path());
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].model_id, "m1");
        assert_eq!(reports[0].health, ModelHealth::Healthy);
        assert_eq!(reports[0].total_requests, Some(5));
    }

    #[test]
    fn stale_heartbeat_is_degraded() {
        let tmp = tempfile::tempdir().unwrap();
        let old = Timestamp::now()
            .checked_sub(jiff::SignedDuration::from_secs(120))
            .unwrap()
            .to_string();
        write_heartbeat(tmp.path(), "m1", &old, 1);
        let reports = scan_heartbeats(tmp.path());
        assert_eq!(reports[0].health, ModelHealth::Degraded);
    }

    #[test]
    fn garbage_file_is_unknown() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(heartbeat_path_for(tmp.path(), "m1"), b"not json").unwrap();
        let reports = scan_heartbeats(tmp.path());
        assert_eq!(reports[0].health, ModelHealth::Unknown);
        assert!(reports[0].total_requests.is_none());
    }

    #[test]
    fn no_heartbeats_yields_empty() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(scan_heartbeats(tmp.path()).is_empty());
    }

    #[test]
    fn camera_reports_none_when_no_registry_colocated() {
        assert!(camera_reports(None).is_none());
    }

    #[test]
    fn camera_reports_reflects_registry_state() {
        let registry = Arc::new(AgentRegistry::new());
        let agent = registry.get_or_create_agent("camA");
        {
            let mut a = agent.lock();
            a.start().unwrap();
            a.add_subscription("m1", SubscriptionConfig::default()).unwrap();
        }
        let reports = camera_reports(Some(&registry)).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].camera_id, "camA");
        assert_eq!(reports[0].subscription_count, 1);
    }
}
