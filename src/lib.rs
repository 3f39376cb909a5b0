//! sensorhub - sensor orchestration over a GPIO request/response bus
//!
//! The binary wires the [`sensorhub_app::Orchestrator`] to the bus through
//! the NDJSON [`bridge`].

pub mod bridge;
