//! DHT22 readings through the external reader binary
//!
//! The reader is invoked as `<command> <pin>` and prints one JSON line:
//! `{"celsius": 21.3, "humidity": 40.1, "error": ""}`.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;

use sensorhub_core::prelude::*;

/// Values reported by one reader run. Either value may be missing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Dht22Reading {
    #[serde(default)]
    pub celsius: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Run the reader for a physical pin, killing it after `timeout`
pub async fn read(command: &Path, pin: u32, timeout: Duration) -> Result<Dht22Reading> {
    let child = Command::new(command)
        .arg(pin.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::process(format!("Failed to run {}: {}", command.display(), e)))?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| Error::timeout(format!("DHT22 read on pin {}", pin)))??;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::process(format!(
            "DHT22 reader exited with code {:?}: {}",
            output.status.code(),
            stderr.trim()
        )));
    }

    parse_output(&stdout)
}

fn parse_output(stdout: &str) -> Result<Dht22Reading> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| Error::read("DHT22 reader returned nothing"))?;

    let reading: Dht22Reading = serde_json::from_str(line)?;
    match reading.error.as_deref() {
        Some(message) if !message.is_empty() => Err(Error::read(message.to_string())),
        _ => Ok(reading),
    }
}
