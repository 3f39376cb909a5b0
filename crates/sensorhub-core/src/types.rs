//! Domain types for sensor devices and their gpio resources

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier assigned by the device store
pub type DeviceId = String;

/// Free-form parameters of an add/update request
pub type Params = serde_json::Map<String, Value>;

/// Gpio table of the physical board, keyed by gpio name (e.g. "GPIO18")
pub type BoardGpios = BTreeMap<String, Value>;

/// Current unix timestamp in seconds, the unit of `Device::last_update`
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

// ─────────────────────────────────────────────────────────
// Enums
// ─────────────────────────────────────────────────────────

/// Measured quantity of a sensor device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Motion,
    Temperature,
    Humidity,
}

impl SensorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Motion => "motion",
            SensorKind::Temperature => "temperature",
            SensorKind::Humidity => "humidity",
        }
    }

    /// Parse a kind name, `None` for kinds this system does not know
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "motion" => Some(SensorKind::Motion),
            "temperature" => Some(SensorKind::Temperature),
            "humidity" => Some(SensorKind::Humidity),
            _ => None,
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit a temperature offset is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "celsius",
            TemperatureUnit::Fahrenheit => "fahrenheit",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "celsius" => Some(TemperatureUnit::Celsius),
            "fahrenheit" => Some(TemperatureUnit::Fahrenheit),
            _ => None,
        }
    }
}

impl fmt::Display for TemperatureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GpioMode {
    #[default]
    Input,
    Output,
}

// ─────────────────────────────────────────────────────────
// Gpio resources
// ─────────────────────────────────────────────────────────

/// A gpio resource as owned and returned by the GPIO service
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GpioResource {
    #[serde(rename = "uuid")]
    pub id: String,

    /// Logical gpio name (e.g. "GPIO4")
    pub gpio: String,

    /// Physical pin number
    #[serde(default)]
    pub pin: u32,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub mode: Option<GpioMode>,

    #[serde(default)]
    pub keep: bool,

    #[serde(default)]
    pub inverted: bool,

    /// Usage a reserved gpio is earmarked for (e.g. "onewire")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,
}

impl GpioResource {
    pub fn new(id: impl Into<String>, gpio: impl Into<String>, pin: u32) -> Self {
        Self {
            id: id.into(),
            gpio: gpio.into(),
            pin,
            name: String::new(),
            mode: None,
            keep: false,
            inverted: false,
            usage: None,
        }
    }

    /// The subset a device keeps about this resource
    pub fn to_ref(&self) -> GpioRef {
        GpioRef {
            resource_id: self.id.clone(),
            gpio: self.gpio.clone(),
            pin: self.pin,
        }
    }
}

/// Device-held pointer to a GPIO service resource
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GpioRef {
    #[serde(rename = "uuid", alias = "resource_id")]
    pub resource_id: String,
    pub gpio: String,
    #[serde(default)]
    pub pin: u32,
}

/// Requested gpio configuration, sent to the GPIO service add/update commands
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GpioSpec {
    /// Set for updates, absent for new gpios
    #[serde(rename = "uuid", default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpio: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<GpioMode>,

    #[serde(default)]
    pub keep: bool,

    #[serde(default)]
    pub inverted: bool,
}

impl GpioSpec {
    /// New input gpio
    pub fn input(name: impl Into<String>, gpio: impl Into<String>, inverted: bool) -> Self {
        Self {
            resource_id: None,
            name: name.into(),
            gpio: Some(gpio.into()),
            mode: Some(GpioMode::Input),
            keep: false,
            inverted,
        }
    }

    /// Reconfiguration of an already provisioned gpio
    pub fn reconfigure(resource_id: impl Into<String>, name: impl Into<String>, inverted: bool) -> Self {
        Self {
            resource_id: Some(resource_id.into()),
            name: name.into(),
            gpio: None,
            mode: None,
            keep: false,
            inverted,
        }
    }

    pub fn with_mode(mut self, mode: GpioMode) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// Reservation request for a bus gpio (see `reserve_gpio`)
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReserveSpec {
    pub name: String,
    pub gpio: String,
    pub usage: String,
}

// ─────────────────────────────────────────────────────────
// Devices
// ─────────────────────────────────────────────────────────

/// A persisted sensor record
///
/// `id` stays empty until the device store assigns one. Handler specific
/// fields are optional and omitted from the record when unused.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Device {
    #[serde(rename = "uuid", default)]
    pub id: DeviceId,

    #[serde(rename = "type")]
    pub kind: SensorKind,

    /// Name of the handler family owning this device (generic, onewire, dht22)
    pub subtype: String,

    pub name: String,

    #[serde(default)]
    pub gpios: Vec<GpioRef>,

    /// Unix timestamp (seconds) of the last value change
    #[serde(rename = "lastupdate", default)]
    pub last_update: i64,

    /// Polling interval in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,

    #[serde(rename = "offsetunit", default, skip_serializing_if = "Option::is_none")]
    pub offset_unit: Option<TemperatureUnit>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub celsius: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fahrenheit: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverted: Option<bool>,

    /// Duration in seconds of the last motion
    #[serde(rename = "lastduration", default, skip_serializing_if = "Option::is_none")]
    pub last_duration: Option<u64>,

    /// One-wire device address (e.g. "28-0316a2795bff")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,

    /// One-wire slave file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Device {
    /// Unpersisted device with every optional field empty
    pub fn new(kind: SensorKind, subtype: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: DeviceId::new(),
            kind,
            subtype: subtype.into(),
            name: name.into(),
            gpios: Vec::new(),
            last_update: 0,
            interval: None,
            offset: None,
            offset_unit: None,
            celsius: None,
            fahrenheit: None,
            humidity: None,
            on: None,
            inverted: None,
            last_duration: None,
            device: None,
            path: None,
        }
    }

    /// First gpio reference, the one single-gpio sensors are wired to
    pub fn primary_gpio(&self) -> Option<&GpioRef> {
        self.gpios.first()
    }

    /// Whether any gpio reference points to the given resource id
    pub fn uses_gpio_resource(&self, resource_id: &str) -> bool {
        self.gpios.iter().any(|g| g.resource_id == resource_id)
    }

    /// Whether any gpio reference uses the given physical gpio name
    pub fn uses_gpio_name(&self, gpio: &str) -> bool {
        self.gpios.iter().any(|g| g.gpio == gpio)
    }

    /// Value of a serialized field, used by store searches
    pub fn field(&self, key: &str) -> Option<Value> {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut value| value.get_mut(key).map(Value::take))
    }
}

/// Resources a kind handler asks the orchestrator to provision or remove
#[derive(Debug, Clone, PartialEq)]
pub struct ResourcePlan<G> {
    pub gpios: Vec<G>,
    pub sensors: Vec<Device>,
}

impl<G> ResourcePlan<G> {
    pub fn new(gpios: Vec<G>, sensors: Vec<Device>) -> Self {
        Self { gpios, sensors }
    }

    /// Plan touching devices only
    pub fn sensors(sensors: Vec<Device>) -> Self {
        Self {
            gpios: Vec::new(),
            sensors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sensor_kind_parse() {
        assert_eq!(SensorKind::parse("motion"), Some(SensorKind::Motion));
        assert_eq!(SensorKind::parse("humidity"), Some(SensorKind::Humidity));
        assert_eq!(SensorKind::parse("light"), None);
        assert_eq!(SensorKind::Temperature.to_string(), "temperature");
    }

    #[test]
    fn test_temperature_unit_parse() {
        assert_eq!(TemperatureUnit::parse("celsius"), Some(TemperatureUnit::Celsius));
        assert_eq!(
            TemperatureUnit::parse("fahrenheit"),
            Some(TemperatureUnit::Fahrenheit)
        );
        assert_eq!(TemperatureUnit::parse(""), None);
    }

    #[test]
    fn test_device_wire_names() {
        let mut device = Device::new(SensorKind::Temperature, "onewire", "kitchen");
        device.id = "dev-1".to_string();
        device.offset_unit = Some(TemperatureUnit::Celsius);
        device.gpios.push(GpioResource::new("g1", "GPIO4", 7).to_ref());

        let value = serde_json::to_value(&device).unwrap();
        assert_eq!(value["uuid"], "dev-1");
        assert_eq!(value["type"], "temperature");
        assert_eq!(value["offsetunit"], "celsius");
        assert_eq!(value["gpios"][0]["uuid"], "g1");
        assert_eq!(value["gpios"][0]["pin"], 7);
        assert!(value.get("humidity").is_none());
    }

    #[test]
    fn test_device_from_record_without_optional_fields() {
        let device: Device = serde_json::from_value(json!({
            "uuid": "abc",
            "type": "motion",
            "subtype": "generic",
            "name": "hall",
            "on": false,
        }))
        .unwrap();
        assert_eq!(device.kind, SensorKind::Motion);
        assert!(device.gpios.is_empty());
        assert_eq!(device.on, Some(false));
        assert_eq!(device.last_update, 0);
    }

    #[test]
    fn test_device_field_lookup() {
        let device = Device::new(SensorKind::Motion, "generic", "hall");
        assert_eq!(device.field("name"), Some(json!("hall")));
        assert_eq!(device.field("type"), Some(json!("motion")));
        assert_eq!(device.field("interval"), None);
    }

    #[test]
    fn test_device_gpio_lookup() {
        let mut device = Device::new(SensorKind::Humidity, "dht22", "attic");
        device.gpios.push(GpioResource::new("g9", "GPIO18", 12).to_ref());
        assert!(device.uses_gpio_resource("g9"));
        assert!(!device.uses_gpio_resource("g1"));
        assert!(device.uses_gpio_name("GPIO18"));
        assert_eq!(device.primary_gpio().map(|g| g.pin), Some(12));
    }

    #[test]
    fn test_gpio_spec_serialization_skips_unset_fields() {
        let spec = GpioSpec::reconfigure("g1", "hall_motion", true);
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["uuid"], "g1");
        assert!(value.get("gpio").is_none());
        assert!(value.get("mode").is_none());

        let spec = GpioSpec::input("hall_motion", "GPIO18", false);
        let value = serde_json::to_value(&spec).unwrap();
        assert!(value.get("uuid").is_none());
        assert_eq!(value["mode"], "input");
        assert_eq!(value["gpio"], "GPIO18");
    }
}
