//! Motion sensors wired to a plain input gpio
//!
//! Event driven: the device follows `gpios.gpio.on` / `gpios.gpio.off`
//! notifications of its gpio and has no poller.

use async_trait::async_trait;

use sensorhub_core::events::{GPIO_OFF, GPIO_ON};
use sensorhub_core::prelude::*;
use sensorhub_core::{unix_now, BusEvent, Device, GpioSpec, Params, ResourcePlan, SensorEvent, SensorKind};

use super::{ensure_board_gpio, ensure_free_gpio, ensure_unique_name};
use crate::context::HandlerContext;
use crate::handler::{KindHandler, ProvisionPlan};
use crate::params::ParamReader;

pub const SUBTYPE: &str = "generic";

fn gpio_name(name: &str) -> String {
    format!("{}_motion", name)
}

pub struct MotionGenericHandler {
    ctx: HandlerContext,
}

impl MotionGenericHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }

    async fn turn_on(&self, mut device: Device) {
        let now = unix_now();
        debug!("Motion sensor \"{}\" turned on", device.name);

        device.on = Some(true);
        device.last_update = now;
        self.ctx.update_value(&device).await;

        self.ctx.publish(SensorEvent::MotionOn {
            device_id: device.id,
            sensor: device.name,
            last_update: now,
        });
    }

    async fn turn_off(&self, mut device: Device, duration: u64) {
        let now = unix_now();
        debug!("Motion sensor \"{}\" turned off", device.name);

        device.on = Some(false);
        device.last_update = now;
        device.last_duration = Some(duration);
        self.ctx.update_value(&device).await;

        self.ctx.publish(SensorEvent::MotionOff {
            device_id: device.id,
            sensor: device.name,
            duration,
            last_update: now,
        });
    }
}

#[async_trait]
impl KindHandler for MotionGenericHandler {
    fn name(&self) -> &'static str {
        "SensorMotionGeneric"
    }

    fn kinds(&self) -> &'static [SensorKind] {
        &[SensorKind::Motion]
    }

    fn subtype(&self) -> &'static str {
        SUBTYPE
    }

    async fn add(&self, params: &Params) -> Result<ProvisionPlan> {
        let assigned = self.ctx.assigned_gpios().await;
        let reader = ParamReader::new(params);

        let name = reader.str("name")?;
        ensure_unique_name(&self.ctx, name, None).await?;
        let gpio = reader.str("gpio")?;
        ensure_free_gpio(&assigned, gpio)?;
        let inverted = reader.bool("inverted")?;
        ensure_board_gpio(&self.ctx, gpio)?;

        let on = match self.ctx.gpio().is_gpio_on(gpio).await {
            Ok(on) => on,
            Err(e) => {
                debug!("Unable to read level of {}: {}", gpio, e);
                false
            }
        };

        let mut device = Device::new(SensorKind::Motion, SUBTYPE, name);
        device.on = Some(on);
        device.inverted = Some(inverted);
        device.last_update = unix_now();
        device.last_duration = Some(0);

        Ok(ResourcePlan::new(
            vec![GpioSpec::input(gpio_name(name), gpio, inverted)],
            vec![device],
        ))
    }

    async fn update(&self, device: &Device, params: &Params) -> Result<ProvisionPlan> {
        let reader = ParamReader::new(params);
        let name = reader.str("name")?;
        ensure_unique_name(&self.ctx, name, Some(&device.name)).await?;
        let inverted = reader.bool("inverted")?;

        let gpios = device
            .primary_gpio()
            .map(|gpio| GpioSpec::reconfigure(&gpio.resource_id, gpio_name(name), inverted))
            .into_iter()
            .collect();

        let mut updated = device.clone();
        updated.name = name.to_string();
        updated.inverted = Some(inverted);

        Ok(ResourcePlan::new(gpios, vec![updated]))
    }

    async fn process_event(&self, event: &BusEvent, device: Option<&Device>) {
        let Some(device) = device else {
            return;
        };
        let on = device.on.unwrap_or(false);

        match event.name.as_str() {
            GPIO_ON if !on => self.turn_on(device.clone()).await,
            GPIO_OFF if on => self.turn_off(device.clone(), event.duration()).await,
            _ => {}
        }
    }
}
