//! One-wire bus readings
//!
//! DS18B20 probes show up under the w1 devices directory as `28-xxxx`
//! folders holding a `w1_slave` file:
//!
//! ```text
//! 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
//! 72 01 4b 46 7f ff 0e 10 57 t=23125
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use sensorhub_core::prelude::*;

/// Name of the slave file inside a device folder
pub const SLAVE_FILE: &str = "w1_slave";

/// Values the probe reports when it failed to convert
const INVALID_READINGS: [&str; 2] = ["85000", "-62"];

/// A probe found on the bus
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OnewireDevice {
    pub device: String,
    pub path: PathBuf,
}

/// Read the raw celsius temperature of a probe
pub async fn read_temperature(path: &Path) -> Result<f64> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::read(format!("Onewire device \"{}\" doesn't exist", path.display()))
        } else {
            Error::read(format!("Unable to read \"{}\": {}", path.display(), e))
        }
    })?;
    parse_slave(&content, path)
}

fn parse_slave(content: &str, path: &Path) -> Result<f64> {
    let raw = content
        .lines()
        .nth(1)
        .and_then(|line| line.find("t=").map(|pos| line[pos + 2..].trim()))
        .ok_or_else(|| {
            Error::read(format!(
                "No temperature found for onewire \"{}\"",
                path.display()
            ))
        })?;

    if INVALID_READINGS.contains(&raw) {
        return Err(Error::read(format!("Invalid temperature \"{}\"", raw)));
    }

    let millis: f64 = raw
        .parse()
        .map_err(|_| Error::read(format!("Invalid temperature \"{}\"", raw)))?;
    Ok(millis / 1000.0)
}

/// List temperature probes (family `28`) under the devices directory
pub fn scan_devices(devices_dir: &Path) -> Result<Vec<OnewireDevice>> {
    let mut found: Vec<OnewireDevice> = std::fs::read_dir(devices_dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            name.starts_with("28").then(|| OnewireDevice {
                path: entry.path().join(SLAVE_FILE),
                device: name,
            })
        })
        .collect();
    found.sort_by(|a, b| a.device.cmp(&b.device));
    debug!("Onewire devices: {:?}", found);
    Ok(found)
}
