//! Configuration types for sensorhub

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Application settings (config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub bus: BusSettings,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub polling: PollingSettings,

    #[serde(default)]
    pub onewire: OnewireSettings,

    #[serde(default)]
    pub dht22: Dht22Settings,
}

/// Gpio service bus settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BusSettings {
    /// Timeout of one gpio service call
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl BusSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    3000
}

/// Device store settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreSettings {
    /// JSON file mirroring the device records
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Keep devices in memory only when false
    #[serde(default = "default_true")]
    pub persist: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            persist: true,
        }
    }
}

fn default_store_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sensorhub")
        .join("devices.json")
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollingSettings {
    /// Smallest accepted sensor interval in seconds
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            min_interval_secs: default_min_interval_secs(),
        }
    }
}

fn default_min_interval_secs() -> u64 {
    60
}

/// One-wire bus settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OnewireSettings {
    #[serde(default = "default_onewire_devices_path")]
    pub devices_path: PathBuf,

    /// Gpio reserved for the bus when the driver gets installed
    #[serde(default = "default_onewire_gpio")]
    pub reserved_gpio: String,

    #[serde(default = "default_etc_modules")]
    pub etc_modules: PathBuf,

    #[serde(default = "default_config_txt")]
    pub config_txt: PathBuf,
}

impl Default for OnewireSettings {
    fn default() -> Self {
        Self {
            devices_path: default_onewire_devices_path(),
            reserved_gpio: default_onewire_gpio(),
            etc_modules: default_etc_modules(),
            config_txt: default_config_txt(),
        }
    }
}

fn default_onewire_devices_path() -> PathBuf {
    PathBuf::from("/sys/bus/w1/devices")
}

fn default_onewire_gpio() -> String {
    "GPIO4".to_string()
}

fn default_etc_modules() -> PathBuf {
    PathBuf::from("/etc/modules")
}

fn default_config_txt() -> PathBuf {
    PathBuf::from("/boot/config.txt")
}

/// DHT22 reader settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Dht22Settings {
    /// Reader binary, called as `<command> <pin>`
    #[serde(default = "default_dht22_command")]
    pub command: PathBuf,

    /// Hard timeout of one reader run
    #[serde(default = "default_dht22_timeout_secs")]
    pub timeout_secs: u64,
}

impl Dht22Settings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for Dht22Settings {
    fn default() -> Self {
        Self {
            command: default_dht22_command(),
            timeout_secs: default_dht22_timeout_secs(),
        }
    }
}

fn default_dht22_command() -> PathBuf {
    PathBuf::from("/usr/local/bin/dht22")
}

fn default_dht22_timeout_secs() -> u64 {
    11
}
