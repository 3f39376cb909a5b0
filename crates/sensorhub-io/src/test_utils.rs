//! Test doubles for the external collaborators
//!
//! [`FakeGpioService`] is a small in-memory gpio service with call logging
//! failure injection and optional latency. [`FlakyDeviceStore`] wraps [`MemoryDeviceStore`]
//! and can fail a chosen `add` call.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use sensorhub_core::prelude::*;
use sensorhub_core::{BoardGpios, Device, GpioResource, GpioSpec, ReserveSpec};

use crate::drivers::Driver;
use crate::gpio::GpioService;
use crate::store::{DeviceStore, MemoryDeviceStore};

#[derive(Debug, Default)]
struct FakeGpioState {
    next_id: usize,
    gpios: BTreeMap<String, GpioResource>,
    reserved: BTreeSet<String>,
    board: BoardGpios,
    levels: HashMap<String, bool>,
    calls: Vec<String>,
    add_count: usize,
    fail_add_at: Option<usize>,
    fail_commands: BTreeSet<&'static str>,
    latency: Duration,
}

impl FakeGpioState {
    fn record(&mut self, call: String) {
        self.calls.push(call);
    }

    fn check(&self, command: &'static str) -> Result<()> {
        if self.fail_commands.contains(command) {
            Err(Error::gpio(format!("{} failed", command)))
        } else {
            Ok(())
        }
    }

    fn pin_of(&self, gpio: &str) -> u32 {
        self.board
            .get(gpio)
            .and_then(|meta| meta.get("pin"))
            .and_then(Value::as_u64)
            .map(|pin| pin as u32)
            .unwrap_or(0)
    }

    fn allocate(&mut self, gpio: &str, name: &str) -> GpioResource {
        self.next_id += 1;
        let mut resource =
            GpioResource::new(format!("gpio-{}", self.next_id), gpio, self.pin_of(gpio));
        resource.name = name.to_string();
        resource
    }
}

/// In-memory gpio service
#[derive(Debug, Default)]
pub struct FakeGpioService {
    state: Mutex<FakeGpioState>,
}

impl FakeGpioService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Service knowing the given board gpios, as `(name, pin)`
    pub fn with_board(gpios: &[(&str, u32)]) -> Self {
        let service = Self::new();
        {
            let mut state = service.lock();
            for (name, pin) in gpios {
                state.board.insert(name.to_string(), json!({ "pin": pin }));
            }
        }
        service
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeGpioState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail the n-th (1-based) `add_gpio` call
    pub fn fail_add_at(&self, n: usize) {
        self.lock().fail_add_at = Some(n);
    }

    /// Make every call of a command fail
    pub fn fail_command(&self, command: &'static str) {
        self.lock().fail_commands.insert(command);
    }

    /// Delay every call, like a round-trip over the bus
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    async fn pause(&self) {
        let latency = self.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    /// Insert a reserved gpio directly
    pub fn insert_reserved(&self, gpio: &str, usage: &str) -> GpioResource {
        let mut state = self.lock();
        let mut resource = state.allocate(gpio, &format!("reserved_{}", usage));
        resource.usage = Some(usage.to_string());
        state.reserved.insert(resource.id.clone());
        state.gpios.insert(resource.id.clone(), resource.clone());
        resource
    }

    pub fn set_level(&self, gpio: &str, on: bool) {
        self.lock().levels.insert(gpio.to_string(), on);
    }

    /// Every call received, formatted as `command:argument`
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Calls of one command
    pub fn calls_of(&self, command: &str) -> Vec<String> {
        let prefix = format!("{}:", command);
        self.lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .cloned()
            .collect()
    }

    pub fn gpio(&self, resource_id: &str) -> Option<GpioResource> {
        self.lock().gpios.get(resource_id).cloned()
    }

    pub fn gpio_count(&self) -> usize {
        self.lock().gpios.len()
    }
}

#[async_trait]
impl GpioService for FakeGpioService {
    async fn add_gpio(&self, spec: &GpioSpec) -> Result<GpioResource> {
        self.pause().await;
        let mut state = self.lock();
        let gpio = spec.gpio.clone().unwrap_or_default();
        state.record(format!("add_gpio:{}", gpio));
        state.check("add_gpio")?;

        state.add_count += 1;
        if state.fail_add_at == Some(state.add_count) {
            return Err(Error::gpio(format!("Unable to configure {}", gpio)));
        }

        let mut resource = state.allocate(&gpio, &spec.name);
        resource.mode = spec.mode;
        resource.keep = spec.keep;
        resource.inverted = spec.inverted;
        state.gpios.insert(resource.id.clone(), resource.clone());
        Ok(resource)
    }

    async fn update_gpio(&self, spec: &GpioSpec) -> Result<GpioResource> {
        self.pause().await;
        let mut state = self.lock();
        let id = spec.resource_id.clone().unwrap_or_default();
        state.record(format!("update_gpio:{}", id));
        state.check("update_gpio")?;

        let resource = state
            .gpios
            .get_mut(&id)
            .ok_or_else(|| Error::gpio(format!("Gpio {} not found", id)))?;
        resource.name = spec.name.clone();
        resource.inverted = spec.inverted;
        resource.keep = spec.keep;
        Ok(resource.clone())
    }

    async fn delete_gpio(&self, resource_id: &str) -> Result<bool> {
        self.pause().await;
        let mut state = self.lock();
        state.record(format!("delete_gpio:{}", resource_id));
        state.check("delete_gpio")?;
        state.reserved.remove(resource_id);
        Ok(state.gpios.remove(resource_id).is_some())
    }

    async fn is_reserved_gpio(&self, resource_id: &str) -> Result<bool> {
        self.pause().await;
        let mut state = self.lock();
        state.record(format!("is_reserved_gpio:{}", resource_id));
        state.check("is_reserved_gpio")?;
        Ok(state.reserved.contains(resource_id))
    }

    async fn get_reserved_gpio(&self, usage: &str) -> Result<Option<GpioResource>> {
        Ok(self.get_reserved_gpios(usage).await?.into_iter().next())
    }

    async fn get_reserved_gpios(&self, usage: &str) -> Result<Vec<GpioResource>> {
        self.pause().await;
        let mut state = self.lock();
        state.record(format!("get_reserved_gpios:{}", usage));
        state.check("get_reserved_gpios")?;
        Ok(state
            .gpios
            .values()
            .filter(|g| state.reserved.contains(&g.id) && g.usage.as_deref() == Some(usage))
            .cloned()
            .collect())
    }

    async fn reserve_gpio(&self, spec: &ReserveSpec) -> Result<GpioResource> {
        self.pause().await;
        {
            let mut state = self.lock();
            state.record(format!("reserve_gpio:{}", spec.gpio));
            state.check("reserve_gpio")?;
        }
        Ok(self.insert_reserved(&spec.gpio, &spec.usage))
    }

    async fn get_assigned_gpios(&self) -> Result<Vec<String>> {
        self.pause().await;
        let mut state = self.lock();
        state.record("get_assigned_gpios:".to_string());
        state.check("get_assigned_gpios")?;
        Ok(state.gpios.values().map(|g| g.gpio.clone()).collect())
    }

    async fn get_raspi_gpios(&self) -> Result<BoardGpios> {
        self.pause().await;
        let mut state = self.lock();
        state.record("get_raspi_gpios:".to_string());
        state.check("get_raspi_gpios")?;
        Ok(state.board.clone())
    }

    async fn is_gpio_on(&self, gpio: &str) -> Result<bool> {
        self.pause().await;
        let mut state = self.lock();
        state.record(format!("is_gpio_on:{}", gpio));
        state.check("is_gpio_on")?;
        Ok(state.levels.get(gpio).copied().unwrap_or(false))
    }
}

/// Device store failing on demand
#[derive(Debug, Default)]
pub struct FlakyDeviceStore {
    inner: MemoryDeviceStore,
    add_count: AtomicUsize,
    fail_add_at: Mutex<Option<usize>>,
    fail_updates: AtomicBool,
    deleted: Mutex<Vec<String>>,
}

impl FlakyDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the n-th (1-based) `add` call
    pub fn fail_add_at(&self, n: usize) {
        *self.fail_add_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(n);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Ids passed to `delete`, in call order
    pub fn deleted(&self) -> Vec<String> {
        self.deleted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl DeviceStore for FlakyDeviceStore {
    async fn get(&self, id: &str) -> Result<Option<Device>> {
        self.inner.get(id).await
    }

    async fn add(&self, device: Device) -> Result<Option<Device>> {
        let count = self.add_count.fetch_add(1, Ordering::SeqCst) + 1;
        let fail_at = *self.fail_add_at.lock().unwrap_or_else(|e| e.into_inner());
        if fail_at == Some(count) {
            return Err(Error::store(format!("Unable to store {}", device.name)));
        }
        self.inner.add(device).await
    }

    async fn update(&self, id: &str, device: &Device) -> Result<bool> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Error::store(format!("Unable to update {}", id)));
        }
        self.inner.update(id, device).await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.deleted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(id.to_string());
        self.inner.delete(id).await
    }

    async fn search_by(&self, key: &str, value: &Value) -> Result<Option<Device>> {
        self.inner.search_by(key, value).await
    }

    async fn search_all_by(&self, key: &str, value: &Value) -> Result<Vec<Device>> {
        self.inner.search_all_by(key, value).await
    }

    async fn all(&self) -> Result<Vec<Device>> {
        self.inner.all().await
    }
}

/// Driver with a fixed installed state
#[derive(Debug)]
pub struct StaticDriver {
    name: String,
    installed: AtomicBool,
}

impl StaticDriver {
    pub fn new(name: impl Into<String>, installed: bool) -> Self {
        Self {
            name: name.into(),
            installed: AtomicBool::new(installed),
        }
    }

    pub fn set_installed(&self, installed: bool) {
        self.installed.store(installed, Ordering::SeqCst);
    }
}

impl Driver for StaticDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_installed(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }
}
