//! Device store boundary and the in-process implementation
//!
//! [`MemoryDeviceStore`] keeps records in memory and, when given a path,
//! mirrors them to a JSON file after every mutation.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;
use serde_json::Value;
use tokio::sync::RwLock;

use sensorhub_core::prelude::*;
use sensorhub_core::Device;

/// Persistence of device records keyed by their id
#[cfg_attr(any(test, feature = "test-helpers"), mockall::automock)]
#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Device>>;

    /// Persist a new device, assigning its id. `None` when the store refused it.
    async fn add(&self, device: Device) -> Result<Option<Device>>;

    /// Replace the record of an existing device
    async fn update(&self, id: &str, device: &Device) -> Result<bool>;

    async fn delete(&self, id: &str) -> Result<bool>;

    /// First device whose serialized `key` field equals `value`
    async fn search_by(&self, key: &str, value: &Value) -> Result<Option<Device>>;

    async fn search_all_by(&self, key: &str, value: &Value) -> Result<Vec<Device>>;

    async fn all(&self) -> Result<Vec<Device>>;
}

/// In-memory device store with optional JSON file persistence
#[derive(Debug, Default)]
pub struct MemoryDeviceStore {
    devices: RwLock<BTreeMap<String, Device>>,
    path: Option<PathBuf>,
}

impl MemoryDeviceStore {
    /// Store living only in memory
    pub fn new() -> Self {
        Self::default()
    }

    /// Store backed by a JSON file, loading existing records
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let devices = load_devices(&path)?;
        info!("Loaded {} devices from {}", devices.len(), path.display());
        Ok(Self {
            devices: RwLock::new(devices),
            path: Some(path),
        })
    }

    fn persist(&self, devices: &BTreeMap<String, Device>) -> Result<()> {
        match &self.path {
            Some(path) => save_devices(path, devices),
            None => Ok(()),
        }
    }
}

fn load_devices(path: &Path) -> Result<BTreeMap<String, Device>> {
    if !path.exists() {
        debug!("No device file at {}", path.display());
        return Ok(BTreeMap::new());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::store(format!("Failed to read {}: {}", path.display(), e)))?;
    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let devices: Vec<Device> = serde_json::from_str(&content)
        .map_err(|e| Error::store(format!("Failed to parse {}: {}", path.display(), e)))?;
    Ok(devices.into_iter().map(|d| (d.id.clone(), d)).collect())
}

fn save_devices(path: &Path, devices: &BTreeMap<String, Device>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::store(format!("Failed to create store directory: {}", e)))?;
    }

    let records: Vec<&Device> = devices.values().collect();
    let content = serde_json::to_string_pretty(&records)?;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| Error::store(format!("Failed to open {}: {}", path.display(), e)))?;

    // Lock is released when file is dropped
    file.lock_exclusive()
        .map_err(|e| Error::store(format!("Failed to lock {}: {}", path.display(), e)))?;
    file.write_all(content.as_bytes())
        .map_err(|e| Error::store(format!("Failed to write {}: {}", path.display(), e)))?;
    file.flush()
        .map_err(|e| Error::store(format!("Failed to flush {}: {}", path.display(), e)))?;

    trace!("Saved {} devices to {}", records.len(), path.display());
    Ok(())
}

fn matches(device: &Device, key: &str, value: &Value) -> bool {
    device.field(key).as_ref() == Some(value)
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn get(&self, id: &str) -> Result<Option<Device>> {
        Ok(self.devices.read().await.get(id).cloned())
    }

    async fn add(&self, mut device: Device) -> Result<Option<Device>> {
        let mut devices = self.devices.write().await;
        device.id = uuid::Uuid::new_v4().to_string();
        devices.insert(device.id.clone(), device.clone());

        if let Err(e) = self.persist(&devices) {
            devices.remove(&device.id);
            return Err(e);
        }
        debug!("Stored device {} ({})", device.id, device.name);
        Ok(Some(device))
    }

    async fn update(&self, id: &str, device: &Device) -> Result<bool> {
        let mut devices = self.devices.write().await;
        let Some(previous) = devices.get(id).cloned() else {
            return Ok(false);
        };

        let mut record = device.clone();
        record.id = id.to_string();
        devices.insert(id.to_string(), record);

        if let Err(e) = self.persist(&devices) {
            devices.insert(id.to_string(), previous);
            return Err(e);
        }
        Ok(true)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut devices = self.devices.write().await;
        let Some(previous) = devices.remove(id) else {
            return Ok(false);
        };

        if let Err(e) = self.persist(&devices) {
            devices.insert(id.to_string(), previous);
            return Err(e);
        }
        Ok(true)
    }

    async fn search_by(&self, key: &str, value: &Value) -> Result<Option<Device>> {
        Ok(self
            .devices
            .read()
            .await
            .values()
            .find(|d| matches(d, key, value))
            .cloned())
    }

    async fn search_all_by(&self, key: &str, value: &Value) -> Result<Vec<Device>> {
        Ok(self
            .devices
            .read()
            .await
            .values()
            .filter(|d| matches(d, key, value))
            .cloned()
            .collect())
    }

    async fn all(&self) -> Result<Vec<Device>> {
        Ok(self.devices.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorhub_core::SensorKind;
    use serde_json::json;
    use tempfile::tempdir;
    use tokio_test::assert_ok;

    fn motion(name: &str) -> Device {
        Device::new(SensorKind::Motion, "generic", name)
    }

    #[tokio::test]
    async fn test_add_assigns_unique_ids() {
        let store = MemoryDeviceStore::new();
        let a = store.add(motion("hall")).await.unwrap().unwrap();
        let b = store.add(motion("porch")).await.unwrap().unwrap();

        assert!(!a.id.is_empty());
        assert_ne!(a.id, b.id);
        assert_eq!(store.get(&a.id).await.unwrap(), Some(a));
        assert_eq!(store.all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_and_delete_unknown() {
        let store = MemoryDeviceStore::new();
        assert!(!assert_ok!(store.update("nope", &motion("x")).await));
        assert!(!assert_ok!(store.delete("nope").await));
    }

    #[tokio::test]
    async fn test_update_keeps_id() {
        let store = MemoryDeviceStore::new();
        let device = store.add(motion("hall")).await.unwrap().unwrap();

        let mut changed = device.clone();
        changed.id = String::new();
        changed.name = "corridor".into();
        assert!(store.update(&device.id, &changed).await.unwrap());

        let stored = store.get(&device.id).await.unwrap().unwrap();
        assert_eq!(stored.id, device.id);
        assert_eq!(stored.name, "corridor");
    }

    #[tokio::test]
    async fn test_search_by_field() {
        let store = MemoryDeviceStore::new();
        store.add(motion("hall")).await.unwrap();
        store
            .add(Device::new(SensorKind::Temperature, "dht22", "attic"))
            .await
            .unwrap();
        store
            .add(Device::new(SensorKind::Humidity, "dht22", "attic"))
            .await
            .unwrap();

        let found = store.search_by("name", &json!("hall")).await.unwrap();
        assert_eq!(found.map(|d| d.name), Some("hall".to_string()));
        assert!(store.search_by("name", &json!("cellar")).await.unwrap().is_none());
        assert_eq!(
            store.search_all_by("name", &json!("attic")).await.unwrap().len(),
            2
        );
        assert_eq!(
            store
                .search_all_by("type", &json!("motion"))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_file_persistence_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("devices.json");

        let id = {
            let store = MemoryDeviceStore::open(&path).unwrap();
            let device = store.add(motion("hall")).await.unwrap().unwrap();
            device.id
        };
        assert!(path.exists());

        let reopened = MemoryDeviceStore::open(&path).unwrap();
        let device = reopened.get(&id).await.unwrap().unwrap();
        assert_eq!(device.name, "hall");

        assert!(reopened.delete(&id).await.unwrap());
        let reopened = MemoryDeviceStore::open(&path).unwrap();
        assert!(reopened.all().await.unwrap().is_empty());
    }

    #[test]
    fn test_open_rejects_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("devices.json");
        std::fs::write(&path, "not json").unwrap();

        let err = MemoryDeviceStore::open(&path).unwrap_err();
        assert!(matches!(err, Error::Store { .. }));
    }
}
