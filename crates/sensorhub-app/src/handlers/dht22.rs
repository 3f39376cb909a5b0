//! DHT22 temperature + humidity sensors
//!
//! One physical sensor yields two devices sharing the same name and gpio.
//! Both are fed by a single poller keyed by the gpio resource.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use sensorhub_core::prelude::*;
use sensorhub_core::{
    convert_from_celsius, unix_now, Device, GpioMode, GpioSpec, Params, ResourcePlan,
    SensorEvent, SensorKind,
};
use sensorhub_io::dht22;

use super::{ensure_board_gpio, ensure_free_gpio, ensure_unique_name, TaskMemo};
use crate::context::HandlerContext;
use crate::handler::{KindHandler, ProvisionPlan, RemovalPlan};
use crate::params::ParamReader;
use crate::task::{PollJob, PollingTask};

pub const SUBTYPE: &str = "dht22";

fn gpio_name(name: &str) -> String {
    format!("{}_dht22", name)
}

/// The temperature and humidity devices of one sensor
#[derive(Debug, Default)]
struct Pair {
    temperature: Option<Device>,
    humidity: Option<Device>,
}

impl Pair {
    fn from_devices(devices: impl IntoIterator<Item = Device>) -> Self {
        let mut pair = Pair::default();
        for device in devices {
            match device.kind {
                SensorKind::Temperature => pair.temperature = Some(device),
                SensorKind::Humidity => pair.humidity = Some(device),
                SensorKind::Motion => {}
            }
        }
        pair
    }

    fn first(&self) -> Option<&Device> {
        self.temperature.as_ref().or(self.humidity.as_ref())
    }

    fn into_vec(self) -> Vec<Device> {
        self.temperature.into_iter().chain(self.humidity).collect()
    }
}

pub struct Dht22Handler {
    ctx: HandlerContext,
    tasks: TaskMemo,
}

impl Dht22Handler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self {
            ctx,
            tasks: TaskMemo::default(),
        }
    }

    /// Both devices named `name`
    async fn find_pair(&self, name: &str) -> Result<Pair> {
        let devices = self.ctx.search_devices("name", &json!(name)).await?;
        Ok(Pair::from_devices(
            devices.into_iter().filter(|d| d.subtype == SUBTYPE),
        ))
    }
}

#[async_trait]
impl KindHandler for Dht22Handler {
    fn name(&self) -> &'static str {
        "SensorDht22"
    }

    fn kinds(&self) -> &'static [SensorKind] {
        &[SensorKind::Temperature, SensorKind::Humidity]
    }

    fn subtype(&self) -> &'static str {
        SUBTYPE
    }

    async fn add(&self, params: &Params) -> Result<ProvisionPlan> {
        let assigned = self.ctx.assigned_gpios().await;
        let min_interval = self.ctx.settings().polling.min_interval_secs;
        let reader = ParamReader::new(params);

        let name = reader.str("name")?;
        ensure_unique_name(&self.ctx, name, None).await?;
        let gpio = reader.str("gpio")?;
        ensure_free_gpio(&assigned, gpio)?;
        let interval = reader.interval("interval", min_interval)?;
        let offset = reader.int("offset")?;
        let offset_unit = reader.offset_unit("offset_unit")?;
        ensure_board_gpio(&self.ctx, gpio)?;

        let now = unix_now();

        let mut temperature = Device::new(SensorKind::Temperature, SUBTYPE, name);
        temperature.interval = Some(interval);
        temperature.offset = Some(offset);
        temperature.offset_unit = Some(offset_unit);
        temperature.last_update = now;

        let mut humidity = Device::new(SensorKind::Humidity, SUBTYPE, name);
        humidity.interval = Some(interval);
        humidity.last_update = now;

        Ok(ResourcePlan::new(
            vec![GpioSpec::input(gpio_name(name), gpio, false)],
            vec![temperature, humidity],
        ))
    }

    async fn update(&self, device: &Device, params: &Params) -> Result<ProvisionPlan> {
        let min_interval = self.ctx.settings().polling.min_interval_secs;
        let reader = ParamReader::new(params);

        let name = reader.str("name")?;
        ensure_unique_name(&self.ctx, name, Some(&device.name)).await?;
        let interval = reader.interval("interval", min_interval)?;
        let offset = reader.int("offset")?;
        let offset_unit = reader.offset_unit("offset_unit")?;

        let pair = self.find_pair(&device.name).await?;

        let mut gpios = Vec::new();
        if name != device.name {
            if let Some(gpio) = pair.first().and_then(Device::primary_gpio) {
                gpios.push(
                    GpioSpec::reconfigure(&gpio.resource_id, gpio_name(name), false)
                        .with_mode(GpioMode::Input),
                );
            }
        }

        let Pair {
            temperature,
            humidity,
        } = pair;
        let temperature = temperature.map(|mut d| {
            d.name = name.to_string();
            d.interval = Some(interval);
            d.offset = Some(offset);
            d.offset_unit = Some(offset_unit);
            d
        });
        let humidity = humidity.map(|mut d| {
            d.name = name.to_string();
            d.interval = Some(interval);
            d
        });

        Ok(ResourcePlan::new(
            gpios,
            temperature.into_iter().chain(humidity).collect(),
        ))
    }

    async fn delete(&self, device: &Device) -> Result<RemovalPlan> {
        let pair = self.find_pair(&device.name).await?;
        let gpios = pair
            .first()
            .or(Some(device))
            .and_then(Device::primary_gpio)
            .cloned()
            .into_iter()
            .collect();

        let mut sensors = pair.into_vec();
        if sensors.is_empty() {
            sensors.push(device.clone());
        }
        Ok(ResourcePlan::new(gpios, sensors))
    }

    fn get_task(&self, device: &Device) -> Option<PollingTask> {
        let settings = self.ctx.settings();
        let period = device.interval.unwrap_or(settings.polling.min_interval_secs);
        let resource_id = device
            .primary_gpio()
            .map(|g| g.resource_id.clone())
            .unwrap_or_else(|| device.id.clone());

        Some(self.tasks.get_or_create(&resource_id, || {
            let job = Arc::new(Dht22Job {
                ctx: self.ctx.clone(),
                resource_id: resource_id.clone(),
                command: settings.dht22.command.clone(),
                timeout: settings.dht22.timeout(),
            });
            PollingTask::new(
                format!("dht22-{}", device.name),
                Duration::from_secs(period),
                job,
            )
        }))
    }
}

/// Poller of one sensor, feeding both devices
pub(crate) struct Dht22Job {
    ctx: HandlerContext,
    resource_id: String,
    command: PathBuf,
    timeout: Duration,
}

impl Dht22Job {
    async fn load_pair(&self) -> Result<Pair> {
        let devices = self.ctx.all_devices().await?;
        Ok(Pair::from_devices(devices.into_iter().filter(|d| {
            d.subtype == SUBTYPE && d.uses_gpio_resource(&self.resource_id)
        })))
    }

    async fn save_temperature(&self, mut device: Device, celsius: f64) {
        let offset = device.offset.unwrap_or(0);
        let unit = device.offset_unit.unwrap_or_default();
        let (celsius, fahrenheit) = convert_from_celsius(celsius, offset, unit);
        let now = unix_now();

        device.celsius = Some(celsius);
        device.fahrenheit = Some(fahrenheit);
        device.last_update = now;
        if !self.ctx.update_value(&device).await {
            error!("Unable to save temperature of dht22 \"{}\"", device.name);
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

    async fn save_humidity(&self, mut device: Device, humidity: f64) {
        let now = unix_now();

        device.humidity = Some(humidity);
        device.last_update = now;
        if !self.ctx.update_value(&device).await {
            error!("Unable to save humidity of dht22 \"{}\"", device.name);
            return;
        }

        self.ctx.publish(SensorEvent::HumidityUpdate {
            device_id: device.id,
            sensor: device.name,
            humidity,
            last_update: now,
        });
    }
}

#[async_trait]
impl PollJob for Dht22Job {
    async fn run(&self) {
        let pair = match self.load_pair().await {
            Ok(pair) => pair,
            Err(e) => {
                error!("Unable to load dht22 devices: {}", e);
                return;
            }
        };
        let Some(pin) = pair.first().and_then(Device::primary_gpio).map(|g| g.pin) else {
            debug!("No dht22 device left on gpio {}", self.resource_id);
            return;
        };

        let reading = match dht22::read(&self.command, pin, self.timeout).await {
            Ok(reading) => reading,
            Err(e) => {
                error!("Unable to read dht22 on pin {}: {}", pin, e);
                return;
            }
        };

        let mut saved = false;
        if let (Some(device), Some(celsius)) = (pair.temperature, reading.celsius) {
            self.save_temperature(device, celsius).await;
            saved = true;
        }
        if let (Some(device), Some(humidity)) = (pair.humidity, reading.humidity) {
            self.save_humidity(device, humidity).await;
            saved = true;
        }
        if !saved {
            warn!("Nothing read from dht22 on pin {}", pin);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::handlers::test_support::*;
    use sensorhub_core::{GpioRef, TemperatureUnit};
    use sensorhub_io::DeviceStore;

    fn handler(t: &TestContext) -> Dht22Handler {
        Dht22Handler::new(t.ctx.clone())
    }

    fn add_params() -> Params {
        params(json!({
            "name": "attic",
            "gpio": "GPIO17",
            "interval": 120,
            "offset": 0,
            "offset_unit": "celsius",
        }))
    }

    /// Store a temperature/humidity pair wired to gpio resource `g1`
    async fn stored_pair(t: &TestContext, name: &str) -> (Device, Device) {
        let gpio = GpioRef {
            resource_id: "g1".into(),
            gpio: "GPIO17".into(),
            pin: 11,
        };
        let mut temperature = Device::new(SensorKind::Temperature, SUBTYPE, name);
        temperature.gpios.push(gpio.clone());
        temperature.interval = Some(120);
        temperature.offset = Some(0);
        temperature.offset_unit = Some(TemperatureUnit::Celsius);
        let mut humidity = Device::new(SensorKind::Humidity, SUBTYPE, name);
        humidity.gpios.push(gpio);
        humidity.interval = Some(120);

        (
            t.store.add(temperature).await.unwrap().unwrap(),
            t.store.add(humidity).await.unwrap().unwrap(),
        )
    }

    #[tokio::test]
    async fn test_add_plans_pair_on_one_gpio() {
        let t = test_context();
        let plan = handler(&t).add(&add_params()).await.unwrap();

        assert_eq!(plan.gpios.len(), 1);
        assert_eq!(plan.gpios[0].name, "attic_dht22");
        assert_eq!(plan.gpios[0].mode, Some(GpioMode::Input));
        assert!(!plan.gpios[0].inverted);

        let kinds: Vec<_> = plan.sensors.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![SensorKind::Temperature, SensorKind::Humidity]);
        assert!(plan.sensors.iter().all(|d| d.name == "attic"));
        assert_eq!(plan.sensors[0].offset_unit, Some(TemperatureUnit::Celsius));
        assert_eq!(plan.sensors[1].offset, None);
        assert_eq!(plan.sensors[1].interval, Some(120));
    }

    #[tokio::test]
    async fn test_add_validation() {
        let t = test_context();
        let h = handler(&t);

        let mut p = add_params();
        p.insert("gpio".into(), json!("GPIO99"));
        assert_eq!(
            h.add(&p).await.unwrap_err().to_string(),
            "Gpio \"GPIO99\" does not exist for this raspberry pi"
        );

        // interval is checked before the board
        p.insert("interval".into(), json!(10));
        assert_eq!(h.add(&p).await.unwrap_err().field(), Some("interval"));
    }

    #[tokio::test]
    async fn test_update_without_rename_keeps_gpio() {
        let t = test_context();
        let (temperature, humidity) = stored_pair(&t, "attic").await;

        let mut p = add_params();
        p.insert("interval".into(), json!(300));
        p.insert("offset".into(), json!(1));
        let plan = handler(&t).update(&humidity, &p).await.unwrap();

        assert!(plan.gpios.is_empty());
        assert_eq!(plan.sensors.len(), 2);
        assert_eq!(plan.sensors[0].id, temperature.id);
        assert_eq!(plan.sensors[0].offset, Some(1));
        assert_eq!(plan.sensors[1].id, humidity.id);
        assert_eq!(plan.sensors[1].interval, Some(300));
        assert_eq!(plan.sensors[1].offset, None);
    }

    #[tokio::test]
    async fn test_update_with_rename() {
        let t = test_context();
        let (temperature, _) = stored_pair(&t, "attic").await;

        let mut p = add_params();
        p.insert("name".into(), json!("loft"));
        let plan = handler(&t).update(&temperature, &p).await.unwrap();

        assert_eq!(plan.gpios.len(), 1);
        assert_eq!(plan.gpios[0].resource_id.as_deref(), Some("g1"));
        assert_eq!(plan.gpios[0].name, "loft_dht22");
        assert!(plan.sensors.iter().all(|d| d.name == "loft"));
    }

    #[tokio::test]
    async fn test_delete_returns_pair_and_gpio() {
        let t = test_context();
        let (temperature, humidity) = stored_pair(&t, "attic").await;

        let plan = handler(&t).delete(&humidity).await.unwrap();
        assert_eq!(plan.gpios.len(), 1);
        assert_eq!(plan.gpios[0].resource_id, "g1");
        let ids: Vec<_> = plan.sensors.iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids, vec![temperature.id, humidity.id]);
    }

    #[tokio::test]
    async fn test_pair_shares_one_task() {
        let t = test_context();
        let (temperature, humidity) = stored_pair(&t, "attic").await;
        let h = handler(&t);

        let task = h.get_task(&temperature).unwrap();
        assert!(h.get_task(&humidity).unwrap().same_as(&task));
        assert_eq!(task.period(), Duration::from_secs(120));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_job_with_failing_reader_changes_nothing() {
        let mut settings = Settings::default();
        settings.dht22.command = PathBuf::from("false");
        let t = test_context_with(settings);
        let (temperature, _) = stored_pair(&t, "attic").await;
        let mut rx = t.ctx.subscribe();

        let job = Dht22Job {
            ctx: t.ctx.clone(),
            resource_id: "g1".into(),
            command: PathBuf::from("false"),
            timeout: Duration::from_secs(5),
        };
        job.run().await;

        assert!(rx.try_recv().is_err());
        let stored = t.store.get(&temperature.id).await.unwrap().unwrap();
        assert_eq!(stored.celsius, None);
    }

    #[tokio::test]
    async fn test_save_values_independently() {
        let t = test_context();
        let (temperature, humidity) = stored_pair(&t, "attic").await;
        let mut rx = t.ctx.subscribe();
        let job = Dht22Job {
            ctx: t.ctx.clone(),
            resource_id: "g1".into(),
            command: PathBuf::from("dht22"),
            timeout: Duration::from_secs(1),
        };

        job.save_temperature(temperature.clone(), 21.5).await;
        job.save_humidity(humidity.clone(), 48.2).await;

        assert_eq!(
            t.store.get(&temperature.id).await.unwrap().unwrap().fahrenheit,
            Some(70.7)
        );
        assert_eq!(
            t.store.get(&humidity.id).await.unwrap().unwrap().humidity,
            Some(48.2)
        );
        assert!(matches!(
            rx.recv().await.unwrap(),
            SensorEvent::TemperatureUpdate { .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            SensorEvent::HumidityUpdate { .. }
        ));

        t.store.fail_updates(true);
        job.save_humidity(humidity, 50.0).await;
        assert!(rx.try_recv().is_err());
    }
}
