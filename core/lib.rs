//! Ruth AI orchestration core: the frame ring buffer and shared-memory
//! exporter (C1), the stream-agent FPS scheduler (C2), the reconciliation
//! engine and assignment client (C3), and the model-container IPC server,
//! inference handler, frame reader, model discovery, and heartbeat (C4).
//!
//! Every operational failure at a subsystem boundary (frame files, sockets,
//! HTTP responses, heartbeat files) is swallowed and counted here, never
//! propagated as a `base::Error`. Programmer errors (state-machine misuse,
//! invalid construction arguments) use `base::Error` and are expected to
//! be `.expect()`'d only at the outermost binary boundary.

pub mod agent;
pub mod config;
pub mod container;
pub mod export;
pub mod model;
pub mod reconcile;
pub mod registry;
pub mod ring;
