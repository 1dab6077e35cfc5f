//! Process configuration, built once at startup from environment
//! variables (§6's "Environment variables the core observes").
//!
//! Grounded on the teacher's `bpaf`-driven `Args`/config-flattening style
//! in `server/src/main.rs`: plain, typed fields with documented defaults,
//! parsed eagerly so a malformed value fails fast rather than surfacing
//! mid-run.

use std::time::Duration;

/// Snapshot of every env var this crate observes, parsed once.
#[derive(Clone, Debug)]
pub struct Config {
    /// `AI_FRAME_EXPORT_ENABLED` (default `false`): gates C1's export
    /// path globally.
    pub frame_export_enabled: bool,
    /// `BACKEND_URL` (default `http://localhost:8080`): base URL for
    /// C3's assignment client.
    pub backend_url: String,
    /// `RECONCILIATION_INTERVAL_SECONDS` (default `30.0`).
    pub reconciliation_interval: Duration,
    /// `VAS_HEARTBEAT_INTERVAL_SECONDS` (default `5`).
    pub heartbeat_interval: Duration,
    /// `VAS_MODELS_DIR` (default `/opt/ruth-ai/models`): model-discovery
    /// root.
    pub models_dir: String,
    /// `VAS_SOCKET_DIR` (default `/tmp`): directory holding
    /// `vas_model_<model_id>.sock` and `vas_heartbeat_<model_id>.json`.
    pub socket_dir: String,
    /// `VAS_FORCE_GPU` (unset by default): when set, overrides startup
    /// GPU probing for tests (`true` forces GPU-present, `false` forces
    /// GPU-absent).
    pub force_gpu: Option<bool>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            frame_export_enabled: false,
            backend_url: "http://localhost:8080".to_string(),
            reconciliation_interval: Duration::from_secs_f64(30.0),
            heartbeat_interval: Duration::from_secs(5),
            models_dir: "/opt/ruth-ai/models".to_string(),
            socket_dir: "/tmp".to_string(),
            force_gpu: None,
        }
    }
}

impl Config {
    /// Reads every observed env var, falling back to its documented
    /// default when unset or unparsable.
    pub fn from_env() -> Self {
        let mut c = Config::default();
        if let Ok(v) = std::env::var("AI_FRAME_EXPORT_ENABLED") {
            c.frame_export_enabled = parse_bool(&v).unwrap_or(c.frame_export_enabled);
        }
        if let Ok(v) = std::env::var("BACKEND_URL") {
            if !v.is_empty() {
                c.backend_url = v;
            }
        }
        if let Ok(v) = std::env::var("RECONCILIATION_INTERVAL_SECONDS") {
            if let Ok(secs) = v.parse::<f64>() {
                if secs > 0.0 {
                    c.reconciliation_interval = Duration::from_secs_f64(secs);
                }
            }
        }
        if let Ok(v) = std::env::var("VAS_HEARTBEAT_INTERVAL_SECONDS") {
            if let Ok(secs) = v.parse::<u64>() {
                if secs > 0 {
                    c.heartbeat_interval = Duration::from_secs(secs);
                }
            }
        }
        if let Ok(v) = std::env::var("VAS_MODELS_DIR") {
            if !v.is_empty() {
                c.models_dir = v;
            }
        }
        if let Ok(v) = std::env::var("VAS_SOCKET_DIR") {
            if !v.is_empty() {
                c.socket_dir = v;
            }
        }
        if let Ok(v) = std::env::var("VAS_FORCE_GPU") {
            c.force_gpu = parse_bool(&v);
        }
        c
    }

    pub fn socket_path(&self, model_id: &str) -> std::path::PathBuf {
        std::path::Path::new(&self.socket_dir).join(format!("vas_model_{model_id}.sock"))
    }

    pub fn heartbeat_path(&self, model_id: &str) -> std::path::PathBuf {
        std::path::Path::new(&self.socket_dir).join(format!("vas_heartbeat_{model_id}.json"))
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = Config::default();
        assert!(!c.frame_export_enabled);
        assert_eq!(c.backend_url, "http://localhost:8080");
        assert_eq!(c.reconciliation_interval, Duration::from_secs(30));
        assert_eq!(c.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(c.models_dir, "/opt/ruth-ai/models");
    }

    #[test]
    fn socket_and_heartbeat_paths_follow_naming_convention() {
        let c = Config::default();
        assert_eq!(c.socket_path("yolo-v8"), std::path::PathBuf::from("/tmp/vas_model_yolo-v8.sock"));
        assert_eq!(
            c.heartbeat_path("yolo-v8"),
            std::path::PathBuf::from("/tmp/vas_heartbeat_yolo-v8.json")
        );
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("garbage"), None);
    }
}
