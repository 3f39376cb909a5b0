//! sensorhub-app - Sensor orchestration for sensorhub
//!
//! This crate holds the kind handler contract and the built-in handlers, the
//! handler registry, the [`Orchestrator`] sagas and event router, the polling
//! task pool, and settings loading.

pub mod config;
pub mod context;
pub mod handler;
pub mod handlers;
pub mod orchestrator;
pub mod params;
pub mod pool;
pub mod registry;
pub mod task;

// Re-export primary types
pub use config::Settings;
pub use context::HandlerContext;
pub use handler::{KindHandler, ProvisionPlan, RemovalPlan};
pub use orchestrator::Orchestrator;
pub use pool::TaskPool;
pub use registry::HandlerRegistry;
pub use task::{PollJob, PollingTask};
