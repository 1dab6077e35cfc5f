//! The assignment client and reconciliation engine/service: pulls desired
//! subscription state from the control plane and converges each camera's
//! live `StreamAgent` toward it.
//!
//! `ReconciliationService::run` alternates running a cycle and waiting on
//! `shutdown_rx.as_future()` raced against an interval sleep, the same
//! cooperative-loop shape `IpcServer::serve` uses.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::agent::{AgentState, SubscriptionConfig};
use crate::model::Assignment;
use crate::registry::AgentRegistry;

/// Read-only HTTP client against the control plane's assignment API.
/// No retries; any failure degrades to an empty list so the
/// reconciliation loop never blocks or raises on a backend hiccup.
#[async_trait::async_trait]
pub trait AssignmentClient: Send + Sync {
    async fn fetch_all_assignments(&self) -> Vec<Assignment>;
    async fn fetch_assignments_for_camera(&self, camera_id: &str) -> Vec<Assignment>;
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Deserialize)]
struct AssignmentsResponse {
    #[serde(default)]
    assignments: Vec<Assignment>,
}

/// `reqwest`-backed `AssignmentClient` against `BACKEND_URL`.
pub struct HttpAssignmentClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpAssignmentClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .expect("reqwest client with only a timeout configured never fails to build");
        HttpAssignmentClient { base_url: base_url.into(), http }
    }

    async fn get(&self, path_and_query: &str) -> Vec<Assignment> {
        let url = format!("{}{}", self.base_url, path_and_query);
        let resp = match self.http.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(url, err = %e, "assignment fetch failed");
                return Vec::new();
            }
        };
        if !resp.status().is_success() {
            warn!(url, status = %resp.status(), "assignment fetch returned non-200");
            return Vec::new();
        }
        match resp.json::<AssignmentsResponse>().await {
            Ok(body) => body.assignments,
            Err(e) => {
                warn!(url, err = %e, "assignment fetch returned malformed JSON");
                Vec::new()
            }
        }
    }
}

#[async_trait::async_trait]
impl AssignmentClient for HttpAssignmentClient {
    async fn fetch_all_assignments(&self) -> Vec<Assignment> {
        self.get("/api/v1/ai-model-assignments?enabled=true&limit=1000").await
    }

    async fn fetch_assignments_for_camera(&self, camera_id: &str) -> Vec<Assignment> {
        self.get(&format!(
            "/api/v1/ai-model-assignments?camera_id={camera_id}&enabled=true&limit=100"
        ))
        .await
    }
}

/// Produces `{desired_fps, priority, parameters}` for each field present
/// on `assignment`; absent fields stay absent.
pub fn build_config(assignment: &Assignment) -> SubscriptionConfig {
    SubscriptionConfig {
        desired_fps: assignment.desired_fps,
        priority: assignment.priority,
        parameters: assignment.parameters.clone(),
    }
}

/// Aggregate outcome of one `reconcile_all` cycle.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ReconcileStats {
    pub added: u64,
    pub removed: u64,
    pub updated: u64,
    pub errors: u64,
}

/// Drives desired subscription state (from the assignment client) into
/// live `StreamAgent`s (owned by the registry).
pub struct ReconciliationEngine {
    client: Arc<dyn AssignmentClient>,
    registry: Arc<AgentRegistry>,
}

impl ReconciliationEngine {
    pub fn new(client: Arc<dyn AssignmentClient>, registry: Arc<AgentRegistry>) -> Self {
        ReconciliationEngine { client, registry }
    }

    /// Runs one full convergence pass over every enabled assignment.
    /// Never raises: per-camera/per-subscription failures are counted in
    /// `errors` and the loop continues.
    pub async fn reconcile_all(&self) -> ReconcileStats {
        let assignments = self.client.fetch_all_assignments().await;
        if assignments.is_empty() {
            return ReconcileStats::default();
        }

        let mut by_camera: HashMap<&str, Vec<&Assignment>> = HashMap::new();
        for a in &assignments {
            by_camera.entry(a.camera_id.as_str()).or_default().push(a);
        }

        let mut stats = ReconcileStats::default();
        for (camera_id, camera_assignments) in by_camera {
            self.reconcile_camera(camera_id, &camera_assignments, &mut stats);
        }
        stats
    }

    fn reconcile_camera(
        &self,
        camera_id: &str,
        assignments: &[&Assignment],
        stats: &mut ReconcileStats,
    ) {
        let agent_handle = self.registry.get_or_create_agent(camera_id);
        let mut agent = agent_handle.lock();

        if agent.state() == AgentState::Created {
            if let Err(e) = agent.start() {
                warn!(camera_id, err = %e.chain(), "failed to start agent during reconciliation");
                stats.errors += 1;
                return;
            }
        }

        let current_models: HashSet<String> = agent
            .list_subscriptions()
            .iter()
            .map(|s| s.model_id.clone())
            .collect();
        let desired_models: HashSet<String> =
            assignments.iter().map(|a| a.model_id.clone()).collect();
        let desired_by_model: HashMap<&str, &Assignment> =
            assignments.iter().map(|a| (a.model_id.as_str(), *a)).collect();

        for model_id in desired_models.difference(&current_models) {
            let config = build_config(desired_by_model[model_id.as_str()]);
            match agent.add_subscription(model_id.clone(), config) {
                Ok(_) => stats.added += 1,
                Err(e) => {
                    warn!(camera_id, model_id, err = %e.chain(), "failed to add subscription");
                    stats.errors += 1;
                }
            }
        }

        for model_id in current_models.difference(&desired_models) {
            match agent.remove_subscription(model_id) {
                Ok(()) => stats.removed += 1,
                Err(e) => {
                    warn!(camera_id, model_id, err = %e.chain(), "failed to remove subscription");
                    stats.errors += 1;
                }
            }
        }

        for model_id in desired_models.intersection(&current_models) {
            let new_config = build_config(desired_by_model[model_id.as_str()]);
            let changed = agent
                .get_subscription(model_id)
                .map(|s| s.config != new_config)
                .unwrap_or(false);
            if !changed {
                continue;
            }
            if let Err(e) = agent.remove_subscription(model_id) {
                warn!(camera_id, model_id, err = %e.chain(), "failed to remove subscription for update");
                stats.errors += 1;
                continue;
            }
            match agent.add_subscription(model_id.clone(), new_config) {
                Ok(_) => stats.updated += 1,
                Err(e) => {
                    warn!(camera_id, model_id, err = %e.chain(), "failed to re-add subscription for update");
                    stats.errors += 1;
                }
            }
        }
    }
}

/// Owns the async reconciliation loop: run a cycle, then wait for either
/// the configured interval or a shutdown signal.
pub struct ReconciliationService {
    engine: Arc<ReconciliationEngine>,
    interval: Duration,
}

impl ReconciliationService {
    pub fn new(engine: Arc<ReconciliationEngine>, interval: Duration) -> Self {
        ReconciliationService { engine, interval }
    }

    /// Runs the loop until `shutdown_rx` fires. Cycle failures are only
    /// ever reflected in `ReconcileStats::errors`; this method itself
    /// never returns `Err`.
    pub async fn run(&self, shutdown_rx: base::shutdown::Receiver) {
        loop {
            let stats = self.engine.reconcile_all().await;
            debug!(
                added = stats.added,
                removed = stats.removed,
                updated = stats.updated,
                errors = stats.errors,
                "reconciliation cycle complete"
            );

            tokio::select! {
                _ = shutdown_rx.as_future() => {
                    info!("reconciliation service stopping");
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::Timestamp;
    use parking_lot::Mutex as StdMutex;

    struct FakeClient {
        assignments: StdMutex<Vec<Assignment>>,
    }

    #[async_trait::async_trait]
    impl AssignmentClient for FakeClient {
        async fn fetch_all_assignments(&self) -> Vec<Assignment> {
            self.assignments.lock().clone()
        }
        async fn fetch_assignments_for_camera(&self, camera_id: &str) -> Vec<Assignment> {
            self.assignments
                .lock()
                .iter()
                .filter(|a| a.camera_id == camera_id)
                .cloned()
                .collect()
        }
    }

    fn assignment(camera_id: &str, model_id: &str, fps: f64) -> Assignment {
        let now = Timestamp::now();
        Assignment {
            id: format!("{camera_id}-{model_id}"),
            camera_id: camera_id.to_string(),
            model_id: model_id.to_string(),
            enabled: true,
            desired_fps: Some(fps),
            priority: None,
            parameters: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn empty_backend_yields_zero_stats() {
        let client = Arc::new(FakeClient { assignments: StdMutex::new(vec![]) });
        let registry = Arc::new(AgentRegistry::new());
        let engine = ReconciliationEngine::new(client, registry);
        assert_eq!(engine.reconcile_all().await, ReconcileStats::default());
    }

    /// Backend has {m1@5fps, m2@10fps} for camera C1; registry has
    /// {m2@5fps, m3@15fps}. After one cycle: {m1, m2}; added=1, removed=1,
    /// updated=1, errors=0.
    #[tokio::test]
    async fn reconcile_converges_to_desired_subscriptions() {
        let client = Arc::new(FakeClient {
            assignments: StdMutex::new(vec![
                assignment("C1", "m1", 5.0),
                assignment("C1", "m2", 10.0),
            ]),
        });
        let registry = Arc::new(AgentRegistry::new());
        {
            let agent_handle = registry.get_or_create_agent("C1");
            let mut agent = agent_handle.lock();
            agent.start().unwrap();
            agent
                .add_subscription("m2", SubscriptionConfig { desired_fps: Some(5.0), ..Default::default() })
                .unwrap();
            agent
                .add_subscription("m3", SubscriptionConfig { desired_fps: Some(15.0), ..Default::default() })
                .unwrap();
        }

        let engine = ReconciliationEngine::new(client, registry.clone());
        let stats = engine.reconcile_all().await;
        assert_eq!(stats, ReconcileStats { added: 1, removed: 1, updated: 1, errors: 0 });

        let agent_handle = registry.get_agent("C1").unwrap();
        let agent = agent_handle.lock();
        let models: HashSet<String> =
            agent.list_subscriptions().iter().map(|s| s.model_id.clone()).collect();
        assert_eq!(models, HashSet::from(["m1".to_string(), "m2".to_string()]));
        assert_eq!(agent.get_subscription("m2").unwrap().config.desired_fps, Some(10.0));
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let client = Arc::new(FakeClient {
            assignments: StdMutex::new(vec![assignment("C1", "m1", 5.0)]),
        });
        let registry = Arc::new(AgentRegistry::new());
        let engine = ReconciliationEngine::new(client, registry);
        let first = engine.reconcile_all().await;
        assert_eq!(first, ReconcileStats { added: 1, removed: 0, updated: 0, errors: 0 });
        let second = engine.reconcile_all().await;
        assert_eq!(second, ReconcileStats::default());
    }
}
