//! Services shared by every kind handler

use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio::sync::broadcast;

use sensorhub_core::prelude::*;
use sensorhub_core::{BoardGpios, Device, SensorEvent};
use sensorhub_io::{DeviceStore, GpioService};

use crate::config::Settings;

/// Capacity of the sensor event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Handle on the collaborators, cloned into every handler and polling job
#[derive(Clone)]
pub struct HandlerContext {
    gpio: Arc<dyn GpioService>,
    store: Arc<dyn DeviceStore>,
    events: broadcast::Sender<SensorEvent>,
    board_gpios: Arc<RwLock<BoardGpios>>,
    settings: Arc<Settings>,
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("gpio", &"<gpio service>")
            .field("store", &"<device store>")
            .field("settings", &self.settings)
            .finish()
    }
}

impl HandlerContext {
    pub fn new(
        gpio: Arc<dyn GpioService>,
        store: Arc<dyn DeviceStore>,
        settings: Arc<Settings>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            gpio,
            store,
            events,
            board_gpios: Arc::new(RwLock::new(BoardGpios::new())),
            settings,
        }
    }

    pub fn gpio(&self) -> &dyn GpioService {
        self.gpio.as_ref()
    }

    pub fn store(&self) -> &dyn DeviceStore {
        self.store.as_ref()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SensorEvent> {
        self.events.subscribe()
    }

    /// Publish a sensor event, dropped when nobody listens
    pub fn publish(&self, event: SensorEvent) {
        if self.events.send(event).is_err() {
            trace!("No subscriber for sensor event");
        }
    }

    // ─────────────────────────────────────────────────────────
    // Board gpios
    // ─────────────────────────────────────────────────────────

    pub fn set_board_gpios(&self, gpios: BoardGpios) {
        let mut board = self.board_gpios.write().unwrap_or_else(|e| e.into_inner());
        *board = gpios;
    }

    pub fn board_gpios(&self) -> BoardGpios {
        self.board_gpios
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Whether the gpio exists on this board
    pub fn has_board_gpio(&self, gpio: &str) -> bool {
        self.board_gpios
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(gpio)
    }

    /// Gpios already configured, empty when the service can't tell
    pub async fn assigned_gpios(&self) -> Vec<String> {
        match self.gpio.get_assigned_gpios().await {
            Ok(gpios) => gpios,
            Err(e) => {
                error!("Unable to get assigned gpios: {}", e);
                Vec::new()
            }
        }
    }

    // ─────────────────────────────────────────────────────────
    // Devices
    // ─────────────────────────────────────────────────────────

    pub async fn get_device(&self, id: &str) -> Result<Option<Device>> {
        self.store.get(id).await
    }

    pub async fn search_device(&self, key: &str, value: &Value) -> Result<Option<Device>> {
        self.store.search_by(key, value).await
    }

    pub async fn search_devices(&self, key: &str, value: &Value) -> Result<Vec<Device>> {
        self.store.search_all_by(key, value).await
    }

    pub async fn all_devices(&self) -> Result<Vec<Device>> {
        self.store.all().await
    }

    /// First device referencing a gpio resource
    pub async fn search_by_gpio(&self, resource_id: &str) -> Result<Option<Device>> {
        Ok(self
            .store
            .all()
            .await?
            .into_iter()
            .find(|d| d.uses_gpio_resource(resource_id)))
    }

    /// Persist new values of a device, false when the store did not take them
    pub async fn update_value(&self, device: &Device) -> bool {
        match self.store.update(&device.id, device).await {
            Ok(updated) => updated,
            Err(e) => {
                error!("Unable to update device {}: {}", device.id, e);
                false
            }
        }
    }
}
