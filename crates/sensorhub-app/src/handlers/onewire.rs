//! DS18B20 temperature probes on the one-wire bus
//!
//! Every probe shares the gpio reserved for the bus when the `onewire`
//! driver gets installed. Values are polled from the probe's `w1_slave` file.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use sensorhub_core::events::{DRIVER_INSTALL, DRIVER_UNINSTALL};
use sensorhub_core::prelude::*;
use sensorhub_core::{
    convert_from_celsius, unix_now, BusEvent, Device, Params, ReserveSpec, ResourcePlan,
    SensorEvent, SensorKind, TemperatureUnit,
};
use sensorhub_io::{onewire, Driver, OnewireDevice, OnewireDriver, ONEWIRE_DRIVER};

use super::{ensure_unique_name, TaskMemo};
use crate::context::HandlerContext;
use crate::handler::{KindHandler, ProvisionPlan};
use crate::params::ParamReader;
use crate::task::{PollJob, PollingTask};

pub const SUBTYPE: &str = "onewire";

/// Gpio usage tag of the bus gpio
const USAGE: &str = "onewire";

const METHODS: &[&str] = &["get_onewire_devices"];

/// Read a probe and convert the value, `None` when the probe can't be read
async fn read_converted(path: &Path, offset: i64, unit: TemperatureUnit) -> Option<(f64, f64)> {
    match onewire::read_temperature(path).await {
        Ok(celsius) => Some(convert_from_celsius(celsius, offset, unit)),
        Err(e) => {
            error!("Unable to read onewire temperature: {}", e);
            None
        }
    }
}

pub struct OnewireHandler {
    ctx: HandlerContext,
    driver: Arc<dyn Driver>,
    tasks: TaskMemo,
}

impl OnewireHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        let settings = &ctx.settings().onewire;
        let driver = Arc::new(OnewireDriver::new(
            settings.etc_modules.clone(),
            settings.config_txt.clone(),
        ));
        Self::with_driver(ctx, driver)
    }

    pub fn with_driver(ctx: HandlerContext, driver: Arc<dyn Driver>) -> Self {
        Self {
            ctx,
            driver,
            tasks: TaskMemo::default(),
        }
    }

    /// Probes currently visible on the bus
    pub fn get_onewire_devices(&self) -> Result<Vec<OnewireDevice>> {
        if !self.driver.is_installed() {
            return Err(Error::command("Onewire driver is not installed"));
        }
        onewire::scan_devices(&self.ctx.settings().onewire.devices_path)
    }

    async fn reserve_bus_gpio(&self) -> Result<()> {
        let spec = ReserveSpec {
            name: format!("reserved_{}", USAGE),
            gpio: self.ctx.settings().onewire.reserved_gpio.clone(),
            usage: USAGE.to_string(),
        };
        let resource = self.ctx.gpio().reserve_gpio(&spec).await?;
        info!("Reserved {} for the onewire bus", resource.gpio);
        Ok(())
    }

    async fn release_bus_gpio(&self) -> Result<()> {
        let reserved = self.ctx.gpio().get_reserved_gpios(USAGE).await?;
        match reserved.first() {
            Some(resource) => {
                self.ctx.gpio().delete_gpio(&resource.id).await?;
                info!("Released onewire bus gpio {}", resource.gpio);
            }
            None => debug!("No onewire gpio to release"),
        }
        Ok(())
    }
}

#[async_trait]
impl KindHandler for OnewireHandler {
    fn name(&self) -> &'static str {
        "SensorOnewire"
    }

    fn kinds(&self) -> &'static [SensorKind] {
        &[SensorKind::Temperature]
    }

    fn subtype(&self) -> &'static str {
        SUBTYPE
    }

    fn drivers(&self) -> Vec<Arc<dyn Driver>> {
        vec![self.driver.clone()]
    }

    fn public_methods(&self) -> &'static [&'static str] {
        METHODS
    }

    async fn call_method(&self, name: &str, _params: &Params) -> Result<Value> {
        match name {
            "get_onewire_devices" => Ok(serde_json::to_value(self.get_onewire_devices()?)?),
            _ => Err(Error::unknown_method(name)),
        }
    }

    async fn add(&self, params: &Params) -> Result<ProvisionPlan> {
        let settings = self.ctx.settings();
        let reader = ParamReader::new(params);

        let name = reader.str("name")?;
        ensure_unique_name(&self.ctx, name, None).await?;
        let device_address = reader.str("device")?;
        let path = reader.str("path")?;
        let interval = reader.interval("interval", settings.polling.min_interval_secs)?;
        let offset = reader.int("offset")?;
        let offset_unit = reader.offset_unit("offset_unit")?;

        let reserved = self
            .ctx
            .gpio()
            .get_reserved_gpio(USAGE)
            .await?
            .ok_or_else(|| Error::command("No gpio reserved for onewire bus"))?;

        let mut device = Device::new(SensorKind::Temperature, SUBTYPE, name);
        if let Some((celsius, fahrenheit)) =
            read_converted(Path::new(path), offset, offset_unit).await
        {
            device.celsius = Some(celsius);
            device.fahrenheit = Some(fahrenheit);
        }
        device.gpios.push(reserved.to_ref());
        device.interval = Some(interval);
        device.offset = Some(offset);
        device.offset_unit = Some(offset_unit);
        device.last_update = unix_now();
        device.device = Some(device_address.to_string());
        device.path = Some(path.into());

        Ok(ResourcePlan::sensors(vec![device]))
    }

    async fn update(&self, device: &Device, params: &Params) -> Result<ProvisionPlan> {
        let settings = self.ctx.settings();
        let reader = ParamReader::new(params);

        let name = reader.str("name")?;
        ensure_unique_name(&self.ctx, name, Some(&device.name)).await?;
        let interval = reader.interval("interval", settings.polling.min_interval_secs)?;
        let offset = reader.int("offset")?;
        let offset_unit = reader.offset_unit("offset_unit")?;

        let mut updated = device.clone();
        updated.name = name.to_string();
        updated.interval = Some(interval);
        updated.offset = Some(offset);
        updated.offset_unit = Some(offset_unit);

        Ok(ResourcePlan::sensors(vec![updated]))
    }

    fn get_task(&self, device: &Device) -> Option<PollingTask> {
        let period = device
            .interval
            .unwrap_or(self.ctx.settings().polling.min_interval_secs);

        Some(self.tasks.get_or_create(&device.id, || {
            let job = Arc::new(OnewireJob {
                ctx: self.ctx.clone(),
                device_id: device.id.clone(),
            });
            PollingTask::new(
                format!("onewire-{}", device.name),
                Duration::from_secs(period),
                job,
            )
        }))
    }

    async fn process_event(&self, event: &BusEvent, _device: Option<&Device>) {
        if event.driver_name() != Some(ONEWIRE_DRIVER) || event.is_driver_in_progress() {
            return;
        }

        let result = match event.name.as_str() {
            DRIVER_INSTALL => self.reserve_bus_gpio().await,
            DRIVER_UNINSTALL => self.release_bus_gpio().await,
            _ => Ok(()),
        };
        if let Err(e) = result {
            error!("Error handling {} event: {}", event.name, e);
        }
    }
}

/// Poller of one probe
pub(crate) struct OnewireJob {
    ctx: HandlerContext,
    device_id: String,
}

#[async_trait]
impl PollJob for OnewireJob {
    async fn run(&self) {
        // fetch the record each tick so renames and offsets are picked up
        let mut device = match self.ctx.get_device(&self.device_id).await {
            Ok(Some(device)) => device,
            Ok(None) => {
                debug!("Onewire device {} is gone", self.device_id);
                return;
            }
            Err(e) => {
                error!("Unable to get onewire device {}: {}", self.device_id, e);
                return;
            }
        };
        let Some(path) = device.path.clone() else {
            warn!("Onewire device \"{}\" has no path", device.name);
            return;
        };

        let offset = device.offset.unwrap_or(0);
        let unit = device.offset_unit.unwrap_or_default();
        let Some((celsius, fahrenheit)) = read_converted(&path, offset, unit).await else {
            return;
        };
        let now = unix_now();

        device.celsius = Some(celsius);
        device.fahrenheit = Some(fahrenheit);
        device.last_update = now;
        if !self.ctx.update_value(&device).await {
            error!("Unable to save onewire sensor \"{}\" value", device.name);
            return;
        }

        self.ctx.publish(SensorEvent::TemperatureUpdate {
            device_id: device.id,
            sensor: device.name,
            celsius: Some(celsius),
            fahrenheit: Some(fahrenheit),
            last_update: now,
        });
    }
}
