//! The stream agent, subscription map, and FPS gate: the pure decision
//! logic that decides which frames get dispatched to which models. No
//! threads, no sockets, no I/O — this module decides, it never acts.
//!
//! The state machine rejects out-of-order transitions with an error
//! rather than silently no-opping them, matching the rest of this crate's
//! lifecycle types.

use base::{bail_t, Error, ErrorKind};
use serde_json::Value;

/// A stream agent's lifecycle state.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum AgentState {
    Created,
    Running,
    Stopped,
}

/// Per-(camera, model) dispatch configuration. Immutable once the
/// subscription exists; an update is a remove+add.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubscriptionConfig {
    pub desired_fps: Option<f64>,
    pub priority: Option<i64>,
    pub parameters: Option<Value>,
}

/// One model's subscription to a stream agent's frames.
#[derive(Clone, Debug)]
pub struct Subscription {
    pub model_id: String,
    pub config: SubscriptionConfig,
    pub active: bool,
    pub last_dispatched_frame_id: Option<u64>,
    pub last_dispatch_timestamp: Option<f64>,
    pub dispatch_count: u64,
    pub drop_count: u64,
}

impl Subscription {
    fn new(model_id: String, config: SubscriptionConfig) -> Self {
        Subscription {
            model_id,
            config,
            active: true,
            last_dispatched_frame_id: None,
            last_dispatch_timestamp: None,
            dispatch_count: 0,
            drop_count: 0,
        }
    }
}

/// Per-subscription counters, as returned by `StreamAgent::get_metrics`.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SubscriptionMetrics {
    pub dispatch_count: u64,
    pub drop_count: u64,
}

/// A stream agent's aggregate metrics snapshot.
#[derive(Clone, Debug)]
pub struct AgentMetrics {
    pub camera_id: String,
    pub state: AgentState,
    pub subscription_count: usize,
    pub per_subscription: Vec<(String, SubscriptionMetrics)>,
}

/// One logical per-camera decision object.
///
/// Not internally synchronized: callers that share one agent across
/// threads must serialize the mutation APIs themselves (the `registry`
/// module does this with a per-agent mutex).
pub struct StreamAgent {
    camera_id: String,
    frame_source_path: Option<String>,
    state: AgentState,
    subscriptions: Vec<Subscription>,
}

impl StreamAgent {
    /// `state = CREATED`, subscriptions empty.
    pub fn new(camera_id: impl Into<String>, frame_source_path: Option<String>) -> Self {
        StreamAgent {
            camera_id: camera_id.into(),
            frame_source_path,
            state: AgentState::Created,
            subscriptions: Vec::new(),
        }
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn frame_source_path(&self) -> Option<&str> {
        self.frame_source_path.as_deref()
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    /// CREATED → RUNNING. Does not start threads, open sockets, or
    /// allocate resources — purely a state bit.
    pub fn start(&mut self) -> Result<(), Error> {
        if self.state != AgentState::Created {
            bail_t!(
                FailedPrecondition,
                "cannot start agent {} from state {:?}",
                self.camera_id,
                self.state
            );
        }
        self.state = AgentState::Running;
        Ok(())
    }

    /// RUNNING → STOPPED.
    pub fn stop(&mut self) -> Result<(), Error> {
        if self.state != AgentState::Running {
            bail_t!(
                FailedPrecondition,
                "cannot stop agent {} from state {:?}",
                self.camera_id,
                self.state
            );
        }
        self.state = AgentState::Stopped;
        Ok(())
    }

    /// Rejects an empty `model_id` or one that's already subscribed.
    pub fn add_subscription(
        &mut self,
        model_id: impl Into<String>,
        config: SubscriptionConfig,
    ) -> Result<&Subscription, Error> {
        let model_id = model_id.into();
        if model_id.is_empty() {
            bail_t!(InvalidArgument, "model_id must not be empty");
        }
        if self.subscriptions.iter().any(|s| s.model_id == model_id) {
            bail_t!(AlreadyExists, "subscription for model {} already exists", model_id);
        }
        self.subscriptions.push(Subscription::new(model_id.clone(), config));
        Ok(self.subscriptions.iter().find(|s| s.model_id == model_id).unwrap())
    }

    /// Immediate removal, no draining. Unknown id is an error.
    pub fn remove_subscription(&mut self, model_id: &str) -> Result<(), Error> {
        let idx = self
            .subscriptions
            .iter()
            .position(|s| s.model_id == model_id)
            .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("no subscription for model {model_id}")))?;
        self.subscriptions.remove(idx);
        Ok(())
    }

    pub fn list_subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    pub fn get_subscription(&self, model_id: &str) -> Option<&Subscription> {
        self.subscriptions.iter().find(|s| s.model_id == model_id)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// The FPS gating algorithm: decides whether a frame should be
    /// dispatched to `model_id`, without mutating any state. Order is
    /// load-bearing: the STOPPED/inactive checks must precede the config
    /// checks so an inert agent never even inspects `desired_fps`. Pair
    /// with `record_dispatch`/`record_drop` to apply the decision, or use
    /// `dispatch` to do both at once.
    pub fn should_dispatch(&self, model_id: &str, frame_timestamp: f64) -> bool {
        if self.state != AgentState::Running {
            return false;
        }
        let Some(s) = self.get_subscription(model_id) else {
            return false;
        };
        if !s.active {
            return false;
        }
        let Some(f) = s.config.desired_fps else {
            return true;
        };
        if !(f > 0.0) || !f.is_finite() {
            return false;
        }
        let Some(last) = s.last_dispatch_timestamp else {
            return true;
        };
        let elapsed = frame_timestamp - last;
        elapsed >= 1.0 / f
    }

    /// Evaluates `should_dispatch` and applies the corresponding counter
    /// update in one step: ALLOW bumps `dispatch_count` and the last-seen
    /// fields, SKIP bumps `drop_count`. This is the entry point dispatch
    /// callers should use; `should_dispatch`/`record_dispatch` remain
    /// available separately for callers that need to inspect the decision
    /// before committing to it.
    pub fn dispatch(&mut self, model_id: &str, frame_id: u64, frame_timestamp: f64) -> bool {
        let allow = self.should_dispatch(model_id, frame_timestamp);
        if allow {
            self.record_dispatch(model_id, frame_id, frame_timestamp);
        } else {
            self.record_drop(model_id);
        }
        allow
    }

    /// Updates `last_dispatched_frame_id`/`last_dispatch_timestamp` and
    /// increments `dispatch_count`. A no-op if the agent is stopped, the
    /// subscription is inactive, or unknown — fail-closed, matching
    /// `should_dispatch`'s gate rather than trusting the caller.
    pub fn record_dispatch(&mut self, model_id: &str, frame_id: u64, frame_timestamp: f64) {
        if self.state != AgentState::Running {
            return;
        }
        if let Some(s) = self.subscriptions.iter_mut().find(|s| s.model_id == model_id) {
            if !s.active {
                return;
            }
            s.last_dispatched_frame_id = Some(frame_id);
            s.last_dispatch_timestamp = Some(frame_timestamp);
            s.dispatch_count += 1;
        }
    }

    /// Increments `drop_count` for a SKIP decision. Always counts,
    /// including for STOPPED/inactive subscriptions: a stopped agent still
    /// increments the drop counter.
    pub fn record_drop(&mut self, model_id: &str) {
        if let Some(s) = self.subscriptions.iter_mut().find(|s| s.model_id == model_id) {
            s.drop_count += 1;
        }
    }

    pub fn get_metrics(&self) -> AgentMetrics {
        AgentMetrics {
            camera_id: self.camera_id.clone(),
            state: self.state,
            subscription_count: self.subscriptions.len(),
            per_subscription: self
                .subscriptions
                .iter()
                .map(|s| {
                    (
                        s.model_id.clone(),
                        SubscriptionMetrics {
                            dispatch_count: s.dispatch_count,
                            drop_count: s.drop_count,
                        },
                    )
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_agent() -> StreamAgent {
        let mut a = StreamAgent::new("cam1", None);
        a.start().unwrap();
        a
    }

    #[test]
    fn start_stop_state_machine() {
        let mut a = StreamAgent::new("cam1", None);
        assert_eq!(a.state(), AgentState::Created);
        assert!(a.stop().is_err());
        a.start().unwrap();
        assert_eq!(a.state(), AgentState::Running);
        assert!(a.start().is_err());
        a.stop().unwrap();
        assert_eq!(a.state(), AgentState::Stopped);
        assert!(a.start().is_err());
    }

    #[test]
    fn add_subscription_rejects_empty_and_duplicate() {
        let mut a = running_agent();
        assert!(a.add_subscription("", SubscriptionConfig::default()).is_err());
        a.add_subscription("m1", SubscriptionConfig::default()).unwrap();
        assert!(a.add_subscription("m1", SubscriptionConfig::default()).is_err());
    }

    #[test]
    fn remove_unknown_subscription_errors() {
        let mut a = running_agent();
        assert!(a.remove_subscription("missing").is_err());
    }

    #[test]
    fn stopped_agent_is_fail_closed() {
        let mut a = StreamAgent::new("cam1", None);
        a.start().unwrap();
        a.add_subscription(
            "m1",
            SubscriptionConfig { desired_fps: Some(5.0), ..Default::default() },
        )
        .unwrap();
        a.stop().unwrap();
        assert!(!a.dispatch("m1", 1, 0.0));
        assert_eq!(a.get_subscription("m1").unwrap().drop_count, 1);
        assert_eq!(a.get_subscription("m1").unwrap().dispatch_count, 0);
        assert!(a.get_subscription("m1").unwrap().last_dispatch_timestamp.is_none());
    }

    #[test]
    fn inactive_subscription_always_skips() {
        let mut a = running_agent();
        a.add_subscription("m1", SubscriptionConfig::default()).unwrap();
        {
            let s = a
                .subscriptions
                .iter_mut()
                .find(|s| s.model_id == "m1")
                .unwrap();
            s.active = false;
        }
        for t in [0.0, 1.0, 2.0] {
            assert!(!a.dispatch("m1", 0, t));
        }
        assert_eq!(a.get_subscription("m1").unwrap().drop_count, 3);
        assert_eq!(a.get_subscription("m1").unwrap().dispatch_count, 0);
    }

    #[test]
    fn missing_desired_fps_always_allows() {
        let mut a = running_agent();
        a.add_subscription("m1", SubscriptionConfig::default()).unwrap();
        for (i, t) in [0.0, 0.01, 0.02].into_iter().enumerate() {
            assert!(a.dispatch("m1", i as u64, t));
        }
        assert_eq!(a.get_subscription("m1").unwrap().dispatch_count, 3);
    }

    #[test]
    fn invalid_desired_fps_is_fail_closed_skip() {
        let mut a = running_agent();
        a.add_subscription(
            "m1",
            SubscriptionConfig { desired_fps: Some(-5.0), ..Default::default() },
        )
        .unwrap();
        assert!(!a.dispatch("m1", 0, 0.0));
        assert_eq!(a.get_subscription("m1").unwrap().drop_count, 1);

        a.add_subscription(
            "m2",
            SubscriptionConfig { desired_fps: Some(f64::NAN), ..Default::default() },
        )
        .unwrap();
        assert!(!a.dispatch("m2", 0, 0.0));
    }

    /// 5 FPS gate, timestamps 0.00/0.10/0.19/0.20/0.25/0.40 => ALLOW, SKIP,
    /// SKIP, ALLOW, SKIP, ALLOW; dispatch_count=3, drop_count=3.
    #[test]
    fn fps_gate_at_5fps_allows_every_fifth_of_a_second() {
        let mut a = running_agent();
        a.add_subscription(
            "m1",
            SubscriptionConfig { desired_fps: Some(5.0), ..Default::default() },
        )
        .unwrap();
        let timestamps = [0.00, 0.10, 0.19, 0.20, 0.25, 0.40];
        let expected = [true, false, false, true, false, true];
        for (i, (&t, &exp)) in timestamps.iter().zip(expected.iter()).enumerate() {
            assert_eq!(a.dispatch("m1", i as u64, t), exp, "frame {i} at t={t}");
        }
        let sub = a.get_subscription("m1").unwrap();
        assert_eq!(sub.dispatch_count, 3);
        assert_eq!(sub.drop_count, 3);
        assert_eq!(sub.last_dispatched_frame_id, Some(5));
    }

    #[test]
    fn fps_cap_never_lets_interval_shrink_below_period() {
        let mut a = running_agent();
        a.add_subscription(
            "m1",
            SubscriptionConfig { desired_fps: Some(2.0), ..Default::default() },
        )
        .unwrap();
        let mut last_allowed: Option<f64> = None;
        let mut allowed_count = 0;
        for i in 0..20u64 {
            let t = i as f64 * 0.1;
            if a.dispatch("m1", i, t) {
                if let Some(prev) = last_allowed {
                    assert!(t - prev >= 0.5 - 1e-9);
                }
                last_allowed = Some(t);
                allowed_count += 1;
            }
        }
        assert_eq!(allowed_count, a.get_subscription("m1").unwrap().dispatch_count);
        assert!(allowed_count > 0);
    }
}
