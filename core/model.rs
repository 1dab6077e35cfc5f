//! Shared data-model types: frame geometry, the closed `PixelFormat` and
//! `ModelType` sum types, detections, and the control-plane records
//! (`Assignment`, `ModelRegistryEntry`, `AiEvent`) that the reconciliation
//! and observability paths consume or produce.
//!
//! The reconciliation path never looks up a `ModelRegistryEntry` (it
//! validates `model_id` only existentially), so that type exists here
//! purely for completeness of the data model, as does `AiEvent`, whose
//! actual persistence lives in the control plane — only its insert-only
//! invariant is this crate's concern, verified against
//! `InMemoryEventStore`.

use std::fmt;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// The only pixel format this design accepts. A closed set, realized as
/// an enum rather than an open string; anything else is rejected at
/// ingress by `PixelFormat::parse`.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    Nv12,
}

impl PixelFormat {
    /// The on-wire `frame.meta` code for this format.
    pub const NV12_WIRE_CODE: u32 = 0;

    pub fn parse(s: &str) -> Option<PixelFormat> {
        if s.eq_ignore_ascii_case("nv12") {
            Some(PixelFormat::Nv12)
        } else {
            None
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("NV12")
    }
}

/// A model's forward-pass runtime. Closed set, validated at manifest
/// ingress.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Pytorch,
    Onnx,
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ModelType::Pytorch => f.write_str("pytorch"),
            ModelType::Onnx => f.write_str("onnx"),
        }
    }
}

/// Errors distinguishing "unsupported pixel format" from "invalid
/// dimensions".
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum GeometryError {
    UnsupportedPixelFormat,
    InvalidDimensions,
}

impl fmt::Display for GeometryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GeometryError::UnsupportedPixelFormat => f.write_str("unsupported pixel format"),
            GeometryError::InvalidDimensions => {
                f.write_str("invalid dimensions (must be even)")
            }
        }
    }
}

impl std::error::Error for GeometryError {}

/// Validated NV12 frame geometry: `width`/`height` positive and even,
/// `data_size = width*height + (width*height)/2`, `stride == width`.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub data_size: usize,
}

impl FrameGeometry {
    /// Validates `(width, height, pixel_format)`: NV12 only; width and
    /// height must both be positive and even.
    pub fn validate(width: u32, height: u32, pixel_format: &str) -> Result<Self, GeometryError> {
        if PixelFormat::parse(pixel_format).is_none() {
            return Err(GeometryError::UnsupportedPixelFormat);
        }
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(GeometryError::InvalidDimensions);
        }
        let luma = (width as usize) * (height as usize);
        Ok(FrameGeometry {
            width,
            height,
            stride: width,
            data_size: luma + luma / 2,
        })
    }
}

/// A single detection, normalized to `[0, 1]` box coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: u32,
    pub class_name: String,
    pub confidence: f32,
    /// `[x_min, y_min, x_max, y_max]`, each in `[0, 1]`.
    pub bbox: [f32; 4],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_id: Option<i64>,
}

impl Detection {
    /// Clips `bbox` into `[0, 1]` in place.
    pub fn clip_bbox(&mut self) {
        for v in &mut self.bbox {
            *v = v.clamp(0.0, 1.0);
        }
    }
}

/// A persisted control-plane record of desired (camera, model) assignment
/// intent. `enabled = false` is soft-deleted intent.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Assignment {
    pub id: String,
    pub camera_id: String,
    pub model_id: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_fps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A model-registry entry. Never looked up by the reconciliation path;
/// kept only for data-model completeness.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ModelRegistryEntry {
    pub model_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub supported_tasks: Vec<String>,
    #[serde(default)]
    pub config_schema: Option<serde_json::Value>,
    pub enabled: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A best-effort, insert-only record of one inference output.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct AiEvent {
    pub id: uuid::Uuid,
    pub camera_id: String,
    pub model_id: String,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub frame_id: Option<u64>,
    pub detections: serde_json::Value,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    pub created_at: Timestamp,
}

/// A write-only, insert-only sink for `AiEvent`s. The control plane owns
/// the real implementation; this trait is the seam an in-process caller
/// (e.g. a future dispatch layer) would use, with failure turned into
/// `None` — never propagated to the inference path.
pub trait EventSink: Send + Sync {
    /// Best-effort insert. Returns the event's id on success, `None` on
    /// any failure. Never raises, never updates, never deletes.
    fn insert(&self, event: AiEvent) -> Option<uuid::Uuid>;
}

/// A trivial insert-only in-memory event store, useful for tests that need
/// to assert the write-once invariant without a real control plane.
#[derive(Default)]
pub struct InMemoryEventStore {
    events: parking_lot::Mutex<Vec<AiEvent>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything inserted so far, in insertion order.
    pub fn events(&self) -> Vec<AiEvent> {
        self.events.lock().clone()
    }
}

impl EventSink for InMemoryEventStore {
    fn insert(&self, event: AiEvent) -> Option<uuid::Uuid> {
        let id = event.id;
        self.events.lock().push(event);
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_rejects_odd_dimensions() {
        assert_eq!(
            FrameGeometry::validate(1919, 1080, "NV12").unwrap_err(),
            GeometryError::InvalidDimensions
        );
    }

    #[test]
    fn geometry_rejects_bad_format() {
        assert_eq!(
            FrameGeometry::validate(1920, 1080, "yuv420").unwrap_err(),
            GeometryError::UnsupportedPixelFormat
        );
    }

    #[test]
    fn geometry_accepts_1080p_nv12() {
        let g = FrameGeometry::validate(1920, 1080, "NV12").unwrap();
        assert_eq!(g.data_size, 3_110_400);
        assert_eq!(g.stride, 1920);
    }

    #[test]
    fn event_store_is_insert_only() {
        let store = InMemoryEventStore::new();
        let now = Timestamp::now();
        let ev = AiEvent {
            id: uuid::Uuid::now_v7(),
            camera_id: "cam1".into(),
            model_id: "m1".into(),
            timestamp: now,
            frame_id: Some(42),
            detections: serde_json::json!([]),
            confidence: None,
            metadata: None,
            created_at: now,
        };
        assert!(store.insert(ev.clone()).is_some());
        assert_eq!(store.events(), vec![ev]);
    }
}
