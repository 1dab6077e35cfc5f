//! The stateless inference handler: the model container's sole
//! request/response logic. Safe to call concurrently; never panics;
//! never propagates a failure to the caller as anything but a
//! `detections: [], error: Some(...)` or `detections: [], error: None`
//! response. An invalid frame *reference* gets an error string; an
//! unreadable *frame* (the expected, frequent case once a frame has
//! scrolled out of the ring buffer) does not.
//!
//! Metrics use the same counter-and-latency-accumulator style as the rest
//! of this crate's best-effort metrics (`AgentMetrics`, `ReconcileStats`):
//! plain `parking_lot::Mutex`-guarded counters, no external metrics crate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::container::frame_reader::{self, FrameRequest};
use crate::container::gpu::Device;
use crate::container::manifest::ModelManifest;
use crate::container::nv12;
use crate::model::{Detection, ModelType};

/// As received over the wire.
#[derive(Clone, Debug, Deserialize)]
pub struct FrameMetadata {
    pub frame_id: u64,
    pub width: u32,
    pub height: u32,
    pub format: String,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub pts: Option<f64>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct InferenceRequest {
    pub frame_reference: String,
    pub frame_metadata: FrameMetadata,
    pub camera_id: String,
    pub model_id: String,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
}

/// As sent over the wire.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct InferenceResponse {
    pub model_id: String,
    pub camera_id: String,
    pub frame_id: u64,
    pub detections: Vec<Detection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InferenceResponse {
    fn error(model_id: String, camera_id: String, frame_id: u64, message: String) -> Self {
        InferenceResponse { model_id, camera_id, frame_id, detections: Vec::new(), metadata: None, error: Some(message) }
    }

    fn empty_no_error(model_id: String, camera_id: String, frame_id: u64) -> Self {
        InferenceResponse { model_id, camera_id, frame_id, detections: Vec::new(), metadata: None, error: None }
    }
}

/// The seam where a real model runtime (`tch`, `ort`, ...) would plug in.
/// This crate ships exactly one implementation, `PlaceholderRuntime`,
/// which is a deterministic mock — not a real ML framework.
pub trait ModelRuntime: Send + Sync {
    /// Runs the forward pass over a preprocessed `(3, H, W)` tensor for
    /// `frame_id`, returning un-thresholded, un-clipped detections.
    fn infer(&self, tensor: &nv12::InputTensor, frame_id: u64) -> Vec<Detection>;
}

/// A deterministic stand-in for a real model: frames with an even
/// `frame_id` get a "person" detection; frames divisible by 3 additionally
/// get a "car" detection. Confidence and boxes are fixed so tests are
/// reproducible.
pub struct PlaceholderRuntime;

impl ModelRuntime for PlaceholderRuntime {
    fn infer(&self, _tensor: &nv12::InputTensor, frame_id: u64) -> Vec<Detection> {
        let mut detections = Vec::new();
        if frame_id % 2 == 0 {
            detections.push(Detection {
                class_id: 0,
                class_name: "person".to_string(),
                confidence: 0.91,
                bbox: [0.10, 0.10, 0.50, 0.50],
                track_id: None,
            });
        }
        if frame_id % 3 == 0 {
            detections.push(Detection {
                class_id: 1,
                class_name: "car".to_string(),
                confidence: 0.76,
                bbox: [0.20, 0.20, 0.60, 0.60],
                track_id: None,
            });
        }
        detections
    }
}

/// Best-effort counters as returned by `get_metrics`.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct HandlerMetrics {
    pub total_requests: u64,
    pub total_errors: u64,
    pub avg_latency_ms: f64,
    pub error_rate: f64,
}

/// The stateless per-model inference handler. One instance per container
/// process; `handle_request` is the entry point every connection calls.
pub struct InferenceHandler {
    model_id: String,
    model_type: ModelType,
    device: Device,
    expected_resolution: (u32, u32),
    confidence_threshold: f32,
    runtime: Arc<dyn ModelRuntime>,
    /// Guards the model forward pass only — never held across I/O.
    /// `PlaceholderRuntime` needs no synchronization at all, but a real
    /// runtime plugged in behind this trait might.
    forward_lock: Mutex<()>,
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    latency_ms_sum: Mutex<f64>,
}

impl InferenceHandler {
    pub fn new(manifest: &ModelManifest, device: Device, runtime: Arc<dyn ModelRuntime>) -> Self {
        InferenceHandler {
            model_id: manifest.model_id.clone(),
            model_type: manifest.model_type,
            device,
            expected_resolution: manifest.expected_resolution,
            confidence_threshold: manifest.confidence_threshold,
            runtime,
            forward_lock: Mutex::new(()),
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            latency_ms_sum: Mutex::new(0.0),
        }
    }

    /// Runs the full request/response contract for one request. Never
    /// panics: every fallible step below returns `Option`/a default
    /// rather than using `unwrap`/`expect`, so there is no exception to
    /// catch.
    pub fn handle_request(&self, request: InferenceRequest) -> InferenceResponse {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();
        let response = self.handle_request_inner(&request);
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        *self.latency_ms_sum.lock() += elapsed_ms;
        if response.error.is_some() {
            self.total_errors.fetch_add(1, Ordering::Relaxed);
        }
        response
    }

    fn handle_request_inner(&self, request: &InferenceRequest) -> InferenceResponse {
        let start = Instant::now();
        let frame_id = request.frame_metadata.frame_id;
        let model_id = request.model_id.clone();
        let camera_id = request.camera_id.clone();

        // Step 1: validate frame_reference.
        let reference = request.frame_reference.as_str();
        let looks_valid = !reference.is_empty()
            && (reference.starts_with("/dev/shm/") || reference.starts_with("/tmp/"));
        if !looks_valid {
            return InferenceResponse::error(
                model_id,
                camera_id,
                frame_id,
                format!("Invalid frame reference: {reference}"),
            );
        }

        // Step 2: read the frame. A read failure is expected and silent.
        let path = std::path::Path::new(reference);
        let frame_request = FrameRequest {
            width: request.frame_metadata.width,
            height: request.frame_metadata.height,
            format: &request.frame_metadata.format,
        };
        let Some(nv12_bytes) = frame_reader::read_frame(path, frame_request) else {
            return InferenceResponse::empty_no_error(model_id, camera_id, frame_id);
        };

        // Step 3: convert/resize/normalize/transpose.
        let rgb = nv12::nv12_to_rgb(
            &nv12_bytes,
            request.frame_metadata.width,
            request.frame_metadata.height,
        );
        let tensor = nv12::preprocess(&rgb, self.expected_resolution.0, self.expected_resolution.1);

        // Step 4: run the model, guarded only across the forward pass.
        let raw_detections = {
            let _guard = self.forward_lock.lock();
            self.runtime.infer(&tensor, frame_id)
        };

        // Step 5: post-process — threshold, then clip.
        let detections: Vec<Detection> = raw_detections
            .into_iter()
            .filter(|d| d.confidence >= self.confidence_threshold)
            .map(|mut d| {
                d.clip_bbox();
                d
            })
            .collect();

        // Step 6: build the response with metadata.
        let inference_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        let metadata = serde_json::json!({
            "inference_time_ms": inference_time_ms,
            "device": self.device.as_str(),
            "model_type": self.model_type.to_string(),
            "frame_width": request.frame_metadata.width,
            "frame_height": request.frame_metadata.height,
        });

        InferenceResponse {
            model_id,
            camera_id,
            frame_id,
            detections,
            metadata: Some(metadata),
            error: None,
        }
    }

    /// Parses a raw JSON request payload and returns a raw JSON response
    /// payload; the shape `core::container::ipc::IpcServer::serve` expects
    /// from its `handle` closure. Malformed JSON is treated the same as
    /// any other uncaught failure: an error-bearing response rather than a
    /// silently dropped connection, since the length-prefix framing layer
    /// (`ipc::read_message`) has already accepted the bytes as a complete
    /// message by the time this runs and has no "don't reply" signal left
    /// to give back through this closure's `Vec<u8>` return type.
    pub fn handle_bytes(&self, request_bytes: &[u8]) -> Vec<u8> {
        match serde_json::from_slice::<InferenceRequest>(request_bytes) {
            Ok(request) => {
                let response = self.handle_request(request);
                serde_json::to_vec(&response).unwrap_or_else(|_| b"{}".to_vec())
            }
            Err(e) => {
                self.total_requests.fetch_add(1, Ordering::Relaxed);
                self.total_errors.fetch_add(1, Ordering::Relaxed);
                let response = InferenceResponse::error(
                    self.model_id.clone(),
                    String::new(),
                    0,
                    format!("Inference exception: malformed request: {e}"),
                );
                serde_json::to_vec(&response).unwrap_or_else(|_| b"{}".to_vec())
            }
        }
    }

    pub fn get_metrics(&self) -> HandlerMetrics {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_errors = self.total_errors.load(Ordering::Relaxed);
        let sum = *self.latency_ms_sum.lock();
        let avg_latency_ms = if total_requests > 0 { sum / total_requests as f64 } else { 0.0 };
        let error_rate = if total_requests > 0 { total_errors as f64 / total_requests as f64 } else { 0.0 };
        HandlerMetrics { total_requests, total_errors, avg_latency_ms, error_rate }
    }
}
