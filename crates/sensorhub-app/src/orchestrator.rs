//! Sensor orchestration
//!
//! The [`Orchestrator`] owns the handler registry and the task pool. It runs
//! the add/update/delete sagas against the GPIO service and device store,
//! and routes bus events to the handlers.
//!
//! Handlers only plan resources, every side effect happens here:
//!
//! ```text
//! add_sensor ──► handler.add ──► add_gpio* ──► store.add* ──► pool.start
//!                                    └──── rollback on failure ◄──┘
//! ```

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::broadcast;

use sensorhub_core::prelude::*;
use sensorhub_core::{BusEvent, Device, GpioRef, GpioResource, Params, SensorEvent};

use crate::context::HandlerContext;
use crate::handler::{KindHandler, ProvisionPlan, RemovalPlan};
use crate::handlers::{Dht22Handler, MotionGenericHandler, OnewireHandler};
use crate::pool::TaskPool;
use crate::registry::HandlerRegistry;

#[cfg(test)]
mod tests;

const ADD_FAILED: &str = "Error occured adding sensor";
const UPDATE_FAILED: &str = "Error occured updating sensor";
const DELETE_FAILED: &str = "Error occured deleting sensor";

pub struct Orchestrator {
    ctx: HandlerContext,
    registry: HandlerRegistry,
    pool: TaskPool,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("pool", &self.pool)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(ctx: HandlerContext) -> Self {
        Self {
            ctx,
            registry: HandlerRegistry::new(),
            pool: TaskPool::new(),
        }
    }

    /// Orchestrator with the built-in motion, onewire and dht22 handlers
    pub fn with_default_handlers(ctx: HandlerContext) -> Result<Self> {
        let mut orchestrator = Self::new(ctx.clone());
        orchestrator.register(Arc::new(MotionGenericHandler::new(ctx.clone())))?;
        orchestrator.register(Arc::new(OnewireHandler::new(ctx.clone())))?;
        orchestrator.register(Arc::new(Dht22Handler::new(ctx)))?;
        Ok(orchestrator)
    }

    pub fn register(&mut self, handler: Arc<dyn KindHandler>) -> Result<()> {
        self.registry.register(handler)
    }

    pub fn context(&self) -> &HandlerContext {
        &self.ctx
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &TaskPool {
        &self.pool
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SensorEvent> {
        self.ctx.subscribe()
    }

    // ─────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────

    /// Load the board gpios and start the pollers of stored devices
    pub async fn start(&self) {
        match self.ctx.gpio().get_raspi_gpios().await {
            Ok(gpios) => {
                debug!("Board has {} gpios", gpios.len());
                self.ctx.set_board_gpios(gpios);
            }
            Err(e) => {
                error!("Unable to get board gpios: {}", e);
                self.ctx.set_board_gpios(Default::default());
            }
        }

        let devices = match self.ctx.all_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                error!("Unable to load devices: {}", e);
                return;
            }
        };

        let mut started = 0;
        for device in devices {
            let Some(handler) = self.registry.resolve_device(&device) else {
                warn!(
                    "No handler for device {} ({}/{})",
                    device.id, device.kind, device.subtype
                );
                continue;
            };
            if let Some(task) = handler.get_task(&device) {
                self.pool.start(Some(task), std::slice::from_ref(&device.id));
                started += 1;
            }
        }
        info!("Orchestrator started, {} device pollers", started);
    }

    pub fn shutdown(&self) {
        self.pool.stop_all();
    }

    // ─────────────────────────────────────────────────────────
    // Sagas
    // ─────────────────────────────────────────────────────────

    /// Validate, provision and store new devices, then start their poller
    pub async fn add_sensor(&self, kind: &str, subtype: &str, params: &Params) -> Result<Vec<Device>> {
        let handler = self.registry.resolve_request(kind, subtype)?;
        let plan = handler.add(params).await?;

        let mut provisioned = Vec::new();
        let mut stored = Vec::new();
        if let Err(e) = self.provision(&plan, &mut provisioned, &mut stored).await {
            error!("Unable to add {}/{} sensor: {}", kind, subtype, e);
            self.rollback(&provisioned, &stored).await;
            return Err(Error::operation(ADD_FAILED, e));
        }

        if let Some(first) = stored.first() {
            let ids: Vec<String> = stored.iter().map(|d| d.id.clone()).collect();
            self.pool.start(handler.get_task(first), &ids);
        }
        info!("Added {}/{} sensor {:?}", kind, subtype, names(&stored));
        Ok(stored)
    }

    async fn provision(
        &self,
        plan: &ProvisionPlan,
        provisioned: &mut Vec<GpioResource>,
        stored: &mut Vec<Device>,
    ) -> Result<()> {
        for spec in &plan.gpios {
            provisioned.push(self.ctx.gpio().add_gpio(spec).await?);
        }
        let refs: Vec<GpioRef> = provisioned.iter().map(GpioResource::to_ref).collect();

        for sensor in &plan.sensors {
            let mut device = sensor.clone();
            device.gpios.extend(refs.iter().cloned());
            let device = self
                .ctx
                .store()
                .add(device)
                .await?
                .ok_or_else(|| Error::store(format!("Device \"{}\" was not stored", sensor.name)))?;
            stored.push(device);
        }
        Ok(())
    }

    /// Undo a partial add, most recent first
    async fn rollback(&self, provisioned: &[GpioResource], stored: &[Device]) {
        for device in stored.iter().rev() {
            if let Err(e) = self.ctx.store().delete(&device.id).await {
                error!("Rollback: unable to delete device {}: {}", device.id, e);
            }
        }
        for gpio in provisioned.iter().rev() {
            if let Err(e) = self.ctx.gpio().delete_gpio(&gpio.id).await {
                error!("Rollback: unable to delete gpio {}: {}", gpio.id, e);
            }
        }
    }

    /// Apply new parameters to a device and restart its poller
    pub async fn update_sensor(&self, id: &str, params: &Params) -> Result<Vec<Device>> {
        let device = self.existing_device(id, UPDATE_FAILED).await?;
        let handler = self.handler_for(&device)?;
        let plan = handler.update(&device, params).await?;

        if let Err(e) = self.apply(&plan).await {
            error!("Unable to update sensor {}: {}", id, e);
            return Err(Error::operation(UPDATE_FAILED, e));
        }

        let affected = if plan.sensors.is_empty() {
            vec![device]
        } else {
            plan.sensors
        };
        let ids: Vec<String> = affected.iter().map(|d| d.id.clone()).collect();
        for id in &ids {
            if self.pool.contains(id) {
                self.pool.stop_id(id);
            }
        }
        self.pool.start(handler.get_task(&affected[0]), &ids);

        info!("Updated sensor {:?}", names(&affected));
        Ok(affected)
    }

    async fn apply(&self, plan: &ProvisionPlan) -> Result<()> {
        for spec in &plan.gpios {
            self.ctx.gpio().update_gpio(spec).await?;
        }
        for sensor in &plan.sensors {
            if !self.ctx.store().update(&sensor.id, sensor).await? {
                return Err(Error::store(format!("Device \"{}\" was not updated", sensor.id)));
            }
        }
        Ok(())
    }

    /// Stop the poller of a device, release its gpios and delete it
    ///
    /// On failure the poller is started again for the ids it was bound to.
    pub async fn delete_sensor(&self, id: &str) -> Result<bool> {
        let device = self.existing_device(id, DELETE_FAILED).await?;
        let handler = self.handler_for(&device)?;

        let bound = self.pool.bound_ids(id);
        if !bound.is_empty() {
            self.pool.stop(&device);
        }

        let plan = match handler.delete(&device).await {
            Ok(plan) => plan,
            Err(e) => {
                self.resume(handler.as_ref(), &device, &bound);
                return Err(e);
            }
        };
        if let Err(e) = self.remove(&plan).await {
            error!("Unable to delete sensor {}: {}", id, e);
            self.resume(handler.as_ref(), &device, &bound);
            return Err(Error::operation(DELETE_FAILED, e));
        }

        info!("Deleted sensor {:?}", names(&plan.sensors));
        Ok(true)
    }

    fn resume(&self, handler: &dyn KindHandler, device: &Device, bound: &[String]) {
        if bound.is_empty() {
            return;
        }
        warn!("Restarting poller of sensor {} after failed delete", device.id);
        self.pool.start(handler.get_task(device), bound);
    }

    async fn remove(&self, plan: &RemovalPlan) -> Result<()> {
        let deleting: HashSet<&str> = plan.sensors.iter().map(|d| d.id.as_str()).collect();
        // every remaining device is scanned for each gpio
        let others: Vec<Device> = self
            .ctx
            .all_devices()
            .await?
            .into_iter()
            .filter(|d| !deleting.contains(d.id.as_str()))
            .collect();

        let mut seen = HashSet::new();
        for gpio in &plan.gpios {
            if !seen.insert(gpio.resource_id.as_str()) {
                continue;
            }
            if self.ctx.gpio().is_reserved_gpio(&gpio.resource_id).await? {
                debug!("Gpio {} is reserved, kept", gpio.gpio);
                continue;
            }
            if others.iter().any(|d| d.uses_gpio_name(&gpio.gpio)) {
                debug!("Gpio {} still used, kept", gpio.gpio);
                continue;
            }
            self.ctx.gpio().delete_gpio(&gpio.resource_id).await?;
        }

        for sensor in &plan.sensors {
            if !self.ctx.store().delete(&sensor.id).await? {
                return Err(Error::store(format!("Device \"{}\" was not deleted", sensor.id)));
            }
        }
        Ok(())
    }

    async fn existing_device(&self, id: &str, failure: &str) -> Result<Device> {
        self.ctx
            .get_device(id)
            .await
            .map_err(|e| Error::operation(failure, e))?
            .ok_or_else(|| Error::device_not_found(id))
    }

    fn handler_for(&self, device: &Device) -> Result<Arc<dyn KindHandler>> {
        self.registry
            .resolve_device(device)
            .ok_or_else(|| Error::unhandled_device(device.kind.as_str(), &device.subtype))
    }

    // ─────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────

    /// Route a bus event to the handlers concerned, dropping anything else
    pub async fn handle_event(&self, event: &BusEvent) {
        if event.startup {
            trace!("Startup event {} dropped", event.name);
            return;
        }

        if event.is_driver_event() {
            if event.is_driver_in_progress() {
                return;
            }
            for handler in self.registry.handlers().iter().filter(|h| h.has_drivers()) {
                handler.process_event(event, None).await;
            }
        } else if event.is_gpio_event() {
            if event.is_gpio_init() {
                return;
            }
            let Some(resource_id) = event.device_id.as_deref() else {
                return;
            };
            let device = match self.ctx.search_by_gpio(resource_id).await {
                Ok(Some(device)) => device,
                Ok(None) => return,
                Err(e) => {
                    error!("Unable to search device of gpio {}: {}", resource_id, e);
                    return;
                }
            };
            if let Some(handler) = self.registry.resolve_device(&device) {
                handler.process_event(event, Some(&device)).await;
            }
        }
    }

    // ─────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────

    /// Invoke a method exposed by a handler
    pub async fn call_method(&self, name: &str, params: &Params) -> Result<Value> {
        let handler = self
            .registry
            .method(name)
            .ok_or_else(|| Error::unknown_method(name))?;
        handler.call_method(name, params).await
    }

    pub fn method_names(&self) -> Vec<&str> {
        self.registry.method_names()
    }

    /// Drivers status and supported sensor types
    pub fn module_config(&self) -> Value {
        let mut drivers = BTreeMap::new();
        let mut types = BTreeMap::new();
        for handler in self.registry.handlers() {
            for driver in handler.drivers() {
                drivers.insert(driver.name().to_string(), driver.is_installed());
            }
            let kinds: Vec<&str> = handler.kinds().iter().map(|k| k.as_str()).collect();
            types.insert(
                handler.name(),
                json!({ "types": kinds, "subtype": handler.subtype() }),
            );
        }
        json!({ "drivers": drivers, "sensorstypes": types })
    }

    pub async fn devices(&self) -> Result<Vec<Device>> {
        self.ctx.all_devices().await
    }

    pub async fn search_by_gpio(&self, resource_id: &str) -> Result<Option<Device>> {
        self.ctx.search_by_gpio(resource_id).await
    }
}

fn names(devices: &[Device]) -> Vec<&str> {
    devices.iter().map(|d| d.name.as_str()).collect()
}
