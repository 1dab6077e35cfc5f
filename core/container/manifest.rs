//! Model manifest parsing and one-shot discovery (§4.4.1, §3).
//!
//! Grounded on the teacher's config-file parsing conventions (YAML via
//! `serde_yaml`, as used for moonfire's own config/manifest files) and on
//! §4.4.1's exact validation order: missing file, then parse/validate
//! failure, then weights-path resolution, then the GPU-contradiction
//! check.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::model::ModelType;

/// Raw, as-parsed `model.yaml` shape. Field names match the manifest
/// file; `ModelManifest` is the validated/resolved form consumers use.
#[derive(Debug, Deserialize)]
struct RawManifest {
    model_id: String,
    model_name: String,
    model_version: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    license: Option<String>,
    #[serde(default)]
    supported_tasks: Vec<String>,
    input_format: String,
    expected_resolution: (u32, u32),
    resource_requirements: RawResourceRequirements,
    model_type: ModelType,
    model_weights: PathBuf,
    confidence_threshold: f32,
    #[serde(default)]
    nms_iou_threshold: Option<f32>,
    #[serde(default)]
    output_schema: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawResourceRequirements {
    gpu_required: bool,
    #[serde(default)]
    gpu_memory_mb: Option<u64>,
    cpu_fallback_allowed: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct ResourceRequirements {
    pub gpu_required: bool,
    pub gpu_memory_mb: Option<u64>,
    pub cpu_fallback_allowed: bool,
}

/// A validated manifest with `model_weights` resolved to an absolute
/// path.
#[derive(Clone, Debug)]
pub struct ModelManifest {
    pub model_id: String,
    pub model_name: String,
    pub model_version: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub license: Option<String>,
    pub supported_tasks: Vec<String>,
    pub expected_resolution: (u32, u32),
    pub resource_requirements: ResourceRequirements,
    pub model_type: ModelType,
    pub model_weights: PathBuf,
    pub confidence_threshold: f32,
    pub nms_iou_threshold: Option<f32>,
    pub output_schema: Option<serde_json::Value>,
}

/// Why a candidate model directory was rejected during discovery.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UnavailableReason {
    MissingModelYaml,
    InvalidModelYaml(String),
    MissingWeightsFile(PathBuf),
}

impl std::fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnavailableReason::MissingModelYaml => write!(f, "missing_model_yaml"),
            UnavailableReason::InvalidModelYaml(msg) => write!(f, "invalid_model_yaml: {msg}"),
            UnavailableReason::MissingWeightsFile(p) => {
                write!(f, "missing weights file: {}", p.display())
            }
        }
    }
}

impl ModelManifest {
    /// Parses and validates `manifest_dir/model.yaml`, resolving
    /// `model_weights` relative to `manifest_dir` when not absolute, per
    /// §4.4.1 steps 1-4.
    pub fn load(manifest_dir: &Path) -> Result<ModelManifest, UnavailableReason> {
        let yaml_path = manifest_dir.join("model.yaml");
        let contents = std::fs::read_to_string(&yaml_path)
            .map_err(|_| UnavailableReason::MissingModelYaml)?;
        let raw: RawManifest = serde_yaml::from_str(&contents)
            .map_err(|e| UnavailableReason::InvalidModelYaml(e.to_string()))?;

        if !raw.input_format.eq_ignore_ascii_case("NV12") {
            return Err(UnavailableReason::InvalidModelYaml(format!(
                "unsupported input_format: {}",
                raw.input_format
            )));
        }
        if raw.expected_resolution.0 == 0 || raw.expected_resolution.1 == 0 {
            return Err(UnavailableReason::InvalidModelYaml(
                "expected_resolution must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&raw.confidence_threshold) {
            return Err(UnavailableReason::InvalidModelYaml(
                "confidence_threshold must be in [0, 1]".to_string(),
            ));
        }
        if let Some(nms) = raw.nms_iou_threshold {
            if !(0.0..=1.0).contains(&nms) {
                return Err(UnavailableReason::InvalidModelYaml(
                    "nms_iou_threshold must be in [0, 1]".to_string(),
                ));
            }
        }
        if raw.resource_requirements.gpu_required && raw.resource_requirements.cpu_fallback_allowed
        {
            return Err(UnavailableReason::InvalidModelYaml(
                "gpu_required and cpu_fallback_allowed are mutually exclusive".to_string(),
            ));
        }

        let model_weights = if raw.model_weights.is_absolute() {
            raw.model_weights.clone()
        } else {
            manifest_dir.join(&raw.model_weights)
        };
        if !model_weights.is_file() {
            return Err(UnavailableReason::MissingWeightsFile(model_weights));
        }

        Ok(ModelManifest {
            model_id: raw.model_id,
            model_name: raw.model_name,
            model_version: raw.model_version,
            description: raw.description,
            author: raw.author,
            license: raw.license,
            supported_tasks: raw.supported_tasks,
            expected_resolution: raw.expected_resolution,
            resource_requirements: ResourceRequirements {
                gpu_required: raw.resource_requirements.gpu_required,
                gpu_memory_mb: raw.resource_requirements.gpu_memory_mb,
                cpu_fallback_allowed: raw.resource_requirements.cpu_fallback_allowed,
            },
            model_type: raw.model_type,
            model_weights,
            confidence_threshold: raw.confidence_threshold,
            nms_iou_threshold: raw.nms_iou_threshold,
            output_schema: raw.output_schema,
        })
    }
}

/// Scans `models_root`'s immediate subdirectories once, at startup,
/// collecting every manifest that loads successfully (§4.4.1: "one-shot
/// operation ... no hot-reload").
pub fn discover(models_root: &Path) -> Vec<ModelManifest> {
    let mut found = Vec::new();
    let entries = match std::fs::read_dir(models_root) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(dir = %models_root.display(), err = %e, "failed to scan models root");
            return found;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        match ModelManifest::load(&path) {
            Ok(m) => found.push(m),
            Err(reason) => {
                tracing::warn!(dir = %path.display(), reason = %reason, "model unavailable");
            }
        }
    }
    found
}

/// Picks the manifest matching `model_id` out of a discovered set.
pub fn select<'a>(manifests: &'a [ModelManifest], model_id: &str) -> Option<&'a ModelManifest> {
    manifests.iter().find(|m| m.model_id == model_id)
}
