//! Kind handler contract
//!
//! A kind handler owns one `subtype` of devices for one or more sensor kinds.
//! Its `add`/`update`/`delete` only plan the resources to provision or remove;
//! the orchestrator carries the plan out and rolls it back on failure.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use sensorhub_core::prelude::*;
use sensorhub_core::{BusEvent, Device, GpioRef, GpioSpec, Params, ResourcePlan, SensorKind};
use sensorhub_io::Driver;

use crate::task::PollingTask;

/// Plan returned by `add` and `update`
pub type ProvisionPlan = ResourcePlan<GpioSpec>;

/// Plan returned by `delete`
pub type RemovalPlan = ResourcePlan<GpioRef>;

#[async_trait]
pub trait KindHandler: Send + Sync {
    /// Unique handler name (e.g. "SensorMotionGeneric")
    fn name(&self) -> &'static str;

    /// Sensor kinds this handler creates devices for
    fn kinds(&self) -> &'static [SensorKind];

    fn subtype(&self) -> &'static str;

    /// Drivers this handler depends on
    fn drivers(&self) -> Vec<Arc<dyn Driver>> {
        Vec::new()
    }

    fn has_drivers(&self) -> bool {
        !self.drivers().is_empty()
    }

    /// Extra operations reachable through the orchestrator
    fn public_methods(&self) -> &'static [&'static str] {
        &[]
    }

    async fn call_method(&self, name: &str, _params: &Params) -> Result<Value> {
        Err(Error::unknown_method(name))
    }

    /// Validate `params` and plan the resources of new devices
    async fn add(&self, params: &Params) -> Result<ProvisionPlan>;

    /// Validate `params` against an existing device and plan the changes
    async fn update(&self, device: &Device, params: &Params) -> Result<ProvisionPlan>;

    /// Plan the removal of a device: its gpios and itself
    async fn delete(&self, device: &Device) -> Result<RemovalPlan> {
        Ok(ResourcePlan::new(device.gpios.clone(), vec![device.clone()]))
    }

    /// Poller feeding the device, `None` for event driven kinds
    ///
    /// Repeated calls return the same task until it gets stopped.
    fn get_task(&self, _device: &Device) -> Option<PollingTask> {
        None
    }

    /// React to a gpio level change or driver lifecycle event
    async fn process_event(&self, _event: &BusEvent, _device: Option<&Device>) {}
}
