//! Settings loading

use std::path::{Path, PathBuf};

use sensorhub_core::prelude::*;

use super::types::Settings;

pub const CONFIG_FILENAME: &str = "config.toml";

/// `<config_dir>/sensorhub/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sensorhub")
        .join(CONFIG_FILENAME)
}

/// Load settings from a config file
///
/// A missing, unreadable or invalid file yields the defaults.
pub fn load_settings(config_path: &Path) -> Settings {
    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}

/// Write a commented default config file if none exists
pub fn init_config(config_path: &Path) -> Result<()> {
    if let Some(parent) = config_path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::config(format!("Failed to create config dir: {}", e)))?;
        }
    }

    if config_path.exists() {
        return Ok(());
    }

    let default_content = r#"# sensorhub configuration

[bus]
request_timeout_ms = 3000   # Gpio service call timeout

[store]
# path = "/var/lib/sensorhub/devices.json"
persist = true              # Set to false to keep devices in memory only

[polling]
min_interval_secs = 60      # Smallest accepted sensor interval

[onewire]
devices_path = "/sys/bus/w1/devices"
reserved_gpio = "GPIO4"     # Reserved when the onewire driver is installed
etc_modules = "/etc/modules"
config_txt = "/boot/config.txt"

[dht22]
command = "/usr/local/bin/dht22"   # Called as <command> <pin>
timeout_secs = 11
"#;
    std::fs::write(config_path, default_content)
        .map_err(|e| Error::config(format!("Failed to write config.toml: {}", e)))?;
    info!("Created default config at {:?}", config_path);

    Ok(())
}
