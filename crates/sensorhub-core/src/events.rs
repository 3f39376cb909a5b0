//! Bus event definitions
//!
//! `BusEvent` is what the bus delivers to us (gpio level changes, driver
//! lifecycle). `SensorEvent` is what sensors publish when their value changes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::types::{DeviceId, Params};

pub const DRIVER_INSTALL: &str = "system.driver.install";
pub const DRIVER_UNINSTALL: &str = "system.driver.uninstall";
pub const GPIO_ON: &str = "gpios.gpio.on";
pub const GPIO_OFF: &str = "gpios.gpio.off";

// ─────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────

/// Notification received from the bus
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BusEvent {
    #[serde(alias = "event")]
    pub name: String,

    /// Replayed at bus startup
    #[serde(default)]
    pub startup: bool,

    #[serde(default)]
    pub params: Params,

    /// Emitting device, for gpio events the gpio resource id
    #[serde(default)]
    pub device_id: Option<String>,
}

impl BusEvent {
    pub fn new(name: impl Into<String>, params: Params) -> Self {
        Self {
            name: name.into(),
            startup: false,
            params,
            device_id: None,
        }
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn is_driver_event(&self) -> bool {
        self.name == DRIVER_INSTALL || self.name == DRIVER_UNINSTALL
    }

    pub fn is_gpio_event(&self) -> bool {
        self.name == GPIO_ON || self.name == GPIO_OFF
    }

    /// Boolean parameter, false when absent or not a bool
    pub fn flag(&self, key: &str) -> bool {
        self.params.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Name of the driver a lifecycle event is about
    pub fn driver_name(&self) -> Option<&str> {
        self.params.get("drivername").and_then(Value::as_str)
    }

    /// Whether a driver lifecycle event reports an in-progress transition
    pub fn is_driver_in_progress(&self) -> bool {
        match self.name.as_str() {
            DRIVER_INSTALL => self.flag("installing"),
            DRIVER_UNINSTALL => self.flag("uninstalling"),
            _ => false,
        }
    }

    /// Whether a gpio event is the initial level report
    pub fn is_gpio_init(&self) -> bool {
        self.flag("init")
    }

    /// Duration in seconds carried by `gpios.gpio.off`
    pub fn duration(&self) -> u64 {
        self.params
            .get("duration")
            .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f.max(0.0) as u64)))
            .unwrap_or(0)
    }
}

// ─────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────

/// Value change published by a sensor
#[derive(Debug, Clone, PartialEq)]
pub enum SensorEvent {
    TemperatureUpdate {
        device_id: DeviceId,
        sensor: String,
        celsius: Option<f64>,
        fahrenheit: Option<f64>,
        last_update: i64,
    },
    HumidityUpdate {
        device_id: DeviceId,
        sensor: String,
        humidity: f64,
        last_update: i64,
    },
    MotionOn {
        device_id: DeviceId,
        sensor: String,
        last_update: i64,
    },
    MotionOff {
        device_id: DeviceId,
        sensor: String,
        duration: u64,
        last_update: i64,
    },
}

impl SensorEvent {
    /// Event name on the bus
    pub fn name(&self) -> &'static str {
        match self {
            SensorEvent::TemperatureUpdate { .. } => "sensors.temperature.update",
            SensorEvent::HumidityUpdate { .. } => "sensors.humidity.update",
            SensorEvent::MotionOn { .. } => "sensors.motion.on",
            SensorEvent::MotionOff { .. } => "sensors.motion.off",
        }
    }

    pub fn device_id(&self) -> &str {
        match self {
            SensorEvent::TemperatureUpdate { device_id, .. }
            | SensorEvent::HumidityUpdate { device_id, .. }
            | SensorEvent::MotionOn { device_id, .. }
            | SensorEvent::MotionOff { device_id, .. } => device_id,
        }
    }

    /// Event payload
    pub fn params(&self) -> Value {
        match self {
            SensorEvent::TemperatureUpdate {
                sensor,
                celsius,
                fahrenheit,
                last_update,
                ..
            } => json!({
                "sensor": sensor,
                "celsius": celsius,
                "fahrenheit": fahrenheit,
                "lastupdate": last_update,
            }),
            SensorEvent::HumidityUpdate {
                sensor,
                humidity,
                last_update,
                ..
            } => json!({
                "sensor": sensor,
                "humidity": humidity,
                "lastupdate": last_update,
            }),
            SensorEvent::MotionOn {
                sensor,
                last_update,
                ..
            } => json!({
                "sensor": sensor,
                "lastupdate": last_update,
            }),
            SensorEvent::MotionOff {
                sensor,
                duration,
                last_update,
                ..
            } => json!({
                "sensor": sensor,
                "duration": duration,
                "lastupdate": last_update,
            }),
        }
    }
}
