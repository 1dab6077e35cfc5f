//! The model container (C4): a long-lived per-model process exposing a
//! length-prefixed JSON-over-UDS inference endpoint. Submodules split the
//! component along its §4.4 subsections: wire framing (`ipc`), manifest
//! discovery (`manifest`), read-only frame access (`frame_reader`), NV12
//! preprocessing (`nv12`), the stateless handler (`handler`), the
//! heartbeat daemon (`heartbeat`), GPU enforcement (`gpu`), and the
//! control-plane-side health aggregator (`health`).

pub mod frame_reader;
pub mod gpu;
pub mod handler;
pub mod health;
pub mod heartbeat;
pub mod ipc;
pub mod manifest;
pub mod nv12;
