//! The agent registry: the process-wide map from `camera_id` to its
//! `StreamAgent`, owning per-agent mutation serialization.
//!
//! One `Mutex<StreamAgent>` per camera, held by the registry, rather than
//! a single lock over the whole map — so reconciliation on camera A never
//! blocks a dispatch decision on camera B. One outer lock over the map
//! itself guards only the lookup/insert, never a per-camera mutation.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::agent::{AgentState, StreamAgent};

/// Owns one `Mutex<StreamAgent>` per camera.
#[derive(Default)]
pub struct AgentRegistry {
    agents: Mutex<HashMap<String, Arc<Mutex<StreamAgent>>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the agent for `camera_id`, creating it (CREATED state,
    /// not yet started) if it doesn't exist.
    pub fn get_or_create_agent(&self, camera_id: &str) -> Arc<Mutex<StreamAgent>> {
        let mut agents = self.agents.lock();
        agents
            .entry(camera_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(StreamAgent::new(camera_id, None))))
            .clone()
    }

    pub fn get_agent(&self, camera_id: &str) -> Option<Arc<Mutex<StreamAgent>>> {
        self.agents.lock().get(camera_id).cloned()
    }

    pub fn list_agents(&self) -> Vec<Arc<Mutex<StreamAgent>>> {
        self.agents.lock().values().cloned().collect()
    }

    /// Removes the agent for `camera_id`, if any. Removal of a non-STOPPED
    /// agent is allowed but logs a warning; no draining is done here or
    /// anywhere else in this crate.
    pub fn remove_agent(&self, camera_id: &str) -> Option<Arc<Mutex<StreamAgent>>> {
        let removed = self.agents.lock().remove(camera_id)?;
        if removed.lock().state() != AgentState::Stopped {
            warn!(camera_id, "removed agent that was not stopped; no draining performed");
        }
        Some(removed)
    }

    pub fn agent_count(&self) -> usize {
        self.agents.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_is_idempotent() {
        let reg = AgentRegistry::new();
        let a = reg.get_or_create_agent("cam1");
        let b = reg.get_or_create_agent("cam1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.agent_count(), 1);
    }

    #[test]
    fn remove_drops_the_agent() {
        let reg = AgentRegistry::new();
        reg.get_or_create_agent("cam1");
        assert!(reg.remove_agent("cam1").is_some());
        assert!(reg.get_agent("cam1").is_none());
        assert_eq!(reg.agent_count(), 0);
    }

    #[test]
    fn per_agent_locks_are_independent() {
        let reg = AgentRegistry::new();
        let a = reg.get_or_create_agent("cam1");
        let b = reg.get_or_create_agent("cam2");
        let _guard_a = a.lock();
        // cam2's lock must be obtainable while cam1's is held.
        let _guard_b = b.try_lock().expect("cam2 lock independent of cam1");
    }
}
