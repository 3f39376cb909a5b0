use std::error::Error as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_test::assert_ok;

use sensorhub_core::events::{DRIVER_INSTALL, GPIO_ON};
use sensorhub_core::{GpioRef, GpioSpec, ResourcePlan, SensorKind};
use sensorhub_io::test_utils::{FakeGpioService, FlakyDeviceStore, StaticDriver};
use sensorhub_io::{DeviceStore, GpioService, MockGpioService, ONEWIRE_DRIVER};

use super::*;
use crate::config::Settings;
use crate::handlers::test_support::{params, test_context, test_context_with, TestContext, BOARD};

/// Orchestrator with the three handlers, the onewire driver reported installed
fn orchestrator(t: &TestContext) -> Orchestrator {
    let mut orchestrator = Orchestrator::new(t.ctx.clone());
    orchestrator
        .register(Arc::new(MotionGenericHandler::new(t.ctx.clone())))
        .unwrap();
    orchestrator
        .register(Arc::new(OnewireHandler::with_driver(
            t.ctx.clone(),
            Arc::new(StaticDriver::new(ONEWIRE_DRIVER, true)),
        )))
        .unwrap();
    orchestrator
        .register(Arc::new(Dht22Handler::new(t.ctx.clone())))
        .unwrap();
    orchestrator
}

/// Handler planning two gpios for one device
struct TwinGpioHandler;

#[async_trait::async_trait]
impl KindHandler for TwinGpioHandler {
    fn name(&self) -> &'static str {
        "SensorMotionTwin"
    }

    fn kinds(&self) -> &'static [SensorKind] {
        &[SensorKind::Motion]
    }

    fn subtype(&self) -> &'static str {
        "twin"
    }

    async fn add(&self, _params: &Params) -> Result<ProvisionPlan> {
        Ok(ResourcePlan::new(
            vec![
                GpioSpec::input("porch_a", "GPIO17", false),
                GpioSpec::input("porch_b", "GPIO18", false),
            ],
            vec![Device::new(SensorKind::Motion, "twin", "porch")],
        ))
    }

    async fn update(&self, _device: &Device, _params: &Params) -> Result<ProvisionPlan> {
        Ok(ResourcePlan::new(Vec::new(), Vec::new()))
    }
}

fn motion_params(name: &str, gpio: &str) -> Params {
    params(json!({"name": name, "gpio": gpio, "inverted": false}))
}

fn dht22_params(name: &str) -> Params {
    params(json!({
        "name": name,
        "gpio": "GPIO17",
        "interval": 120,
        "offset": 0,
        "offset_unit": "celsius",
    }))
}

fn onewire_params(name: &str, interval: u64) -> Params {
    params(json!({
        "name": name,
        "device": "28-0316a2795bff",
        "path": "/nonexistent/28-0316a2795bff/w1_slave",
        "interval": interval,
        "offset": 0,
        "offset_unit": "celsius",
    }))
}

// ─────────────────────────────────────────────────────────
// Registration
// ─────────────────────────────────────────────────────────

#[test]
fn test_duplicate_registration_is_rejected() {
    let t = test_context();
    let mut orchestrator = Orchestrator::with_default_handlers(t.ctx.clone()).unwrap();
    assert_eq!(orchestrator.registry().len(), 3);

    let err = orchestrator
        .register(Arc::new(MotionGenericHandler::new(t.ctx.clone())))
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Handler \"SensorMotionGeneric\" is already registered"
    );
    assert!(err.is_fatal());
    assert_eq!(orchestrator.registry().len(), 3);
    assert_eq!(orchestrator.method_names(), vec!["get_onewire_devices"]);
}

// ─────────────────────────────────────────────────────────
// add_sensor
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_add_onewire_with_mocked_reservation() {
    let mut gpio = MockGpioService::new();
    gpio.expect_get_assigned_gpios().returning(|| Ok(Vec::new()));
    gpio.expect_get_reserved_gpio()
        .withf(|usage| usage == "onewire")
        .times(1)
        .returning(|_| Ok(Some(GpioResource::new("g1", "GPIO4", 7))));
    gpio.expect_add_gpio().never();

    let store = Arc::new(FlakyDeviceStore::new());
    let ctx = HandlerContext::new(Arc::new(gpio), store.clone(), Arc::new(Settings::default()));
    let mut orchestrator = Orchestrator::new(ctx.clone());
    orchestrator
        .register(Arc::new(OnewireHandler::with_driver(
            ctx,
            Arc::new(StaticDriver::new(ONEWIRE_DRIVER, true)),
        )))
        .unwrap();

    let devices = assert_ok!(
        orchestrator
            .add_sensor("temperature", "onewire", &onewire_params("kitchen", 120))
            .await
    );

    assert_eq!(devices.len(), 1);
    let device = &devices[0];
    assert_eq!(device.gpios.len(), 1);
    assert_eq!(device.gpios[0].resource_id, "g1");
    assert_eq!(device.gpios[0].gpio, "GPIO4");
    assert_eq!(device.interval, Some(120));
    assert_eq!(store.all().await.unwrap(), devices);

    let task = orchestrator.pool().task_for(&device.id).unwrap();
    assert!(task.is_running());
    assert_eq!(task.period(), Duration::from_secs(120));
    orchestrator.shutdown();
}

#[tokio::test]
async fn test_add_motion_stamps_provisioned_gpio() {
    let t = test_context();
    let orchestrator = orchestrator(&t);

    let devices = orchestrator
        .add_sensor("motion", "generic", &motion_params("hall", "GPIO18"))
        .await
        .unwrap();

    let device = &devices[0];
    assert_eq!(
        device.gpios,
        vec![GpioRef {
            resource_id: "gpio-1".into(),
            gpio: "GPIO18".into(),
            pin: 12,
        }]
    );
    assert_eq!(t.gpio.gpio("gpio-1").unwrap().name, "hall_motion");
    // event driven, no poller
    assert!(orchestrator.pool().is_empty());
}

#[tokio::test]
async fn test_add_dht22_binds_one_task_to_both_devices() {
    let t = test_context();
    let orchestrator = orchestrator(&t);

    let devices = orchestrator
        .add_sensor("humidity", "dht22", &dht22_params("attic"))
        .await
        .unwrap();

    assert_eq!(devices.len(), 2);
    assert!(devices.iter().all(|d| d.uses_gpio_resource("gpio-1")));
    let first = orchestrator.pool().task_for(&devices[0].id).unwrap();
    let second = orchestrator.pool().task_for(&devices[1].id).unwrap();
    assert!(first.same_as(&second));
    assert!(first.is_running());
    orchestrator.shutdown();
    assert!(!first.is_running());
}

#[tokio::test]
async fn test_add_unsupported_kind_provisions_nothing() {
    let t = test_context();
    let orchestrator = orchestrator(&t);

    let err = orchestrator
        .add_sensor("light", "generic", &motion_params("hall", "GPIO18"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedKind { .. }));

    let err = orchestrator
        .add_sensor("motion", "pir", &motion_params("hall", "GPIO18"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedKind { .. }));
    assert!(t.gpio.calls().is_empty());
}

#[tokio::test]
async fn test_add_validation_error_is_returned_unchanged() {
    let t = test_context();
    let orchestrator = orchestrator(&t);

    let err = orchestrator
        .add_sensor("motion", "generic", &params(json!({"name": "hall"})))
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(err.to_string(), "Parameter \"gpio\" is missing");
    assert!(t.gpio.calls_of("add_gpio").is_empty());
    assert!(t.store.all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_add_gpio_failure_is_wrapped() {
    let t = test_context();
    t.gpio.fail_add_at(1);
    let orchestrator = orchestrator(&t);

    let err = orchestrator
        .add_sensor("motion", "generic", &motion_params("hall", "GPIO18"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Error occured adding sensor");
    assert!(err.source().is_some());
    assert!(t.store.all().await.unwrap().is_empty());
    assert_eq!(t.gpio.gpio_count(), 0);
}

#[tokio::test]
async fn test_add_second_gpio_failure_releases_the_first() {
    let t = test_context();
    t.gpio.fail_add_at(2);
    let mut orchestrator = Orchestrator::new(t.ctx.clone());
    orchestrator.register(Arc::new(TwinGpioHandler)).unwrap();

    let err = orchestrator
        .add_sensor("motion", "twin", &params(json!({})))
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Error occured adding sensor");
    assert_eq!(
        t.gpio.calls_of("add_gpio"),
        vec!["add_gpio:GPIO17", "add_gpio:GPIO18"]
    );
    assert_eq!(t.gpio.calls_of("delete_gpio"), vec!["delete_gpio:gpio-1"]);
    assert_eq!(t.gpio.gpio_count(), 0);
    assert!(t.store.all().await.unwrap().is_empty());
    assert!(t.store.deleted().is_empty());
}

#[tokio::test]
async fn test_add_failed_rollback_keeps_original_error() {
    let t = test_context();
    t.store.fail_add_at(1);
    t.gpio.fail_command("delete_gpio");
    let orchestrator = orchestrator(&t);

    let err = orchestrator
        .add_sensor("motion", "generic", &motion_params("hall", "GPIO18"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Operation { .. }));
    assert_eq!(err.to_string(), "Error occured adding sensor");
    let cause = err.source().map(|s| s.to_string());
    assert_eq!(cause.as_deref(), Some("Device store error: Unable to store hall"));
    assert_eq!(t.gpio.calls_of("delete_gpio"), vec!["delete_gpio:gpio-1"]);
    assert!(t.store.all().await.unwrap().is_empty());
    assert!(orchestrator.pool().is_empty());
}

#[tokio::test]
async fn test_add_store_failure_rolls_back_in_reverse() {
    let t = test_context();
    t.store.fail_add_at(2);
    let orchestrator = orchestrator(&t);

    let err = orchestrator
        .add_sensor("temperature", "dht22", &dht22_params("attic"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Operation { .. }));

    // first device was stored then removed, then the gpio released
    assert_eq!(t.store.deleted().len(), 1);
    assert!(t.store.all().await.unwrap().is_empty());
    assert_eq!(t.gpio.calls_of("delete_gpio"), vec!["delete_gpio:gpio-1"]);
    assert_eq!(t.gpio.gpio_count(), 0);
    assert!(orchestrator.pool().is_empty());
}

// ─────────────────────────────────────────────────────────
// update_sensor
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_update_restarts_task_with_new_interval() {
    let t = test_context();
    t.gpio.insert_reserved("GPIO4", "onewire");
    let orchestrator = orchestrator(&t);

    let devices = orchestrator
        .add_sensor("temperature", "onewire", &onewire_params("kitchen", 120))
        .await
        .unwrap();
    let id = devices[0].id.clone();
    let before = orchestrator.pool().task_for(&id).unwrap();

    let updated = orchestrator
        .update_sensor(&id, &onewire_params("kitchen", 300))
        .await
        .unwrap();
    assert_eq!(updated[0].interval, Some(300));
    assert_eq!(
        t.store.get(&id).await.unwrap().unwrap().interval,
        Some(300)
    );

    let after = orchestrator.pool().task_for(&id).unwrap();
    assert!(before.is_stopped());
    assert!(!after.same_as(&before));
    assert!(after.is_running());
    assert_eq!(after.period(), Duration::from_secs(300));
    orchestrator.shutdown();
}

#[tokio::test]
async fn test_update_renames_motion_gpio() {
    let t = test_context();
    let orchestrator = orchestrator(&t);
    let devices = orchestrator
        .add_sensor("motion", "generic", &motion_params("hall", "GPIO18"))
        .await
        .unwrap();

    orchestrator
        .update_sensor(
            &devices[0].id,
            &params(json!({"name": "porch", "inverted": true})),
        )
        .await
        .unwrap();

    let gpio = t.gpio.gpio("gpio-1").unwrap();
    assert_eq!(gpio.name, "porch_motion");
    assert!(gpio.inverted);
    assert!(orchestrator.pool().is_empty());
}

#[tokio::test]
async fn test_update_unknown_device() {
    let t = test_context();
    let orchestrator = orchestrator(&t);
    let err = orchestrator
        .update_sensor("missing", &Params::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DeviceNotFound { .. }));
}

#[tokio::test]
async fn test_update_store_failure_is_wrapped() {
    let t = test_context();
    let orchestrator = orchestrator(&t);
    let devices = orchestrator
        .add_sensor("motion", "generic", &motion_params("hall", "GPIO18"))
        .await
        .unwrap();
    t.store.fail_updates(true);

    let err = orchestrator
        .update_sensor(&devices[0].id, &motion_params("hall", "GPIO18"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Error occured updating sensor");
}

#[tokio::test]
async fn test_unhandled_device() {
    let t = test_context();
    let orchestrator = orchestrator(&t);
    let device = t
        .store
        .add(Device::new(SensorKind::Motion, "pir", "ghost"))
        .await
        .unwrap()
        .unwrap();

    let err = orchestrator.delete_sensor(&device.id).await.unwrap_err();
    assert_eq!(err.to_string(), "Unhandled sensor type \"motion-pir\"");
}

// ─────────────────────────────────────────────────────────
// delete_sensor
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_delete_dht22_pair_releases_gpio() {
    let t = test_context();
    let orchestrator = orchestrator(&t);
    let devices = orchestrator
        .add_sensor("temperature", "dht22", &dht22_params("attic"))
        .await
        .unwrap();
    let task = orchestrator.pool().task_for(&devices[0].id).unwrap();

    assert!(orchestrator.delete_sensor(&devices[1].id).await.unwrap());

    assert!(task.is_stopped());
    assert!(orchestrator.pool().is_empty());
    assert!(t.store.all().await.unwrap().is_empty());
    assert_eq!(t.gpio.calls_of("delete_gpio"), vec!["delete_gpio:gpio-1"]);
}

#[tokio::test]
async fn test_delete_keeps_reserved_gpio() {
    let t = test_context();
    let reserved = t.gpio.insert_reserved("GPIO4", "onewire");
    let orchestrator = orchestrator(&t);
    let devices = orchestrator
        .add_sensor("temperature", "onewire", &onewire_params("kitchen", 120))
        .await
        .unwrap();

    assert!(orchestrator.delete_sensor(&devices[0].id).await.unwrap());

    assert!(t.gpio.calls_of("delete_gpio").is_empty());
    assert!(t.gpio.gpio(&reserved.id).is_some());
    assert!(t.store.all().await.unwrap().is_empty());
    assert!(orchestrator.pool().is_empty());
}

#[tokio::test]
async fn test_shared_gpio_released_with_its_last_device() {
    let t = test_context();
    let orchestrator = orchestrator(&t);
    let devices = orchestrator
        .add_sensor("motion", "generic", &motion_params("hall", "GPIO18"))
        .await
        .unwrap();
    let shared = devices[0].gpios[0].clone();

    let mut other = Device::new(SensorKind::Motion, "generic", "mirror");
    other.gpios.push(shared.clone());
    let other = t.store.add(other).await.unwrap().unwrap();

    assert!(orchestrator.delete_sensor(&devices[0].id).await.unwrap());
    assert!(t.gpio.calls_of("delete_gpio").is_empty());
    assert!(t.gpio.gpio(&shared.resource_id).is_some());
    assert_eq!(t.store.all().await.unwrap().len(), 1);

    assert!(orchestrator.delete_sensor(&other.id).await.unwrap());
    assert_eq!(
        t.gpio.calls_of("delete_gpio"),
        vec![format!("delete_gpio:{}", shared.resource_id)]
    );
    assert!(t.gpio.gpio(&shared.resource_id).is_none());
    assert!(t.store.all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_delete_restarts_poller() {
    let t = test_context();
    let orchestrator = orchestrator(&t);
    let devices = orchestrator
        .add_sensor("temperature", "dht22", &dht22_params("attic"))
        .await
        .unwrap();
    let before = orchestrator.pool().task_for(&devices[0].id).unwrap();
    t.gpio.fail_command("is_reserved_gpio");

    let err = orchestrator.delete_sensor(&devices[0].id).await.unwrap_err();

    assert_eq!(err.to_string(), "Error occured deleting sensor");
    assert!(before.is_stopped());
    let after = orchestrator.pool().task_for(&devices[0].id).unwrap();
    assert!(after.is_running());
    assert!(!after.same_as(&before));
    assert!(orchestrator.pool().task_for(&devices[1].id).unwrap().same_as(&after));
    assert_eq!(t.store.all().await.unwrap().len(), 2);
    orchestrator.shutdown();
}

#[tokio::test]
async fn test_delete_unknown_device() {
    let t = test_context();
    let orchestrator = orchestrator(&t);
    let err = orchestrator.delete_sensor("missing").await.unwrap_err();
    assert_eq!(err.to_string(), "Sensor with uuid \"missing\" doesn't exist");
}

// ─────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_gpio_event_reaches_motion_handler() {
    let t = test_context();
    let orchestrator = orchestrator(&t);
    let devices = orchestrator
        .add_sensor("motion", "generic", &motion_params("hall", "GPIO18"))
        .await
        .unwrap();
    let id = devices[0].id.clone();
    let mut rx = orchestrator.subscribe();

    let init = BusEvent::new(GPIO_ON, params(json!({"init": true}))).with_device_id("gpio-1");
    orchestrator.handle_event(&init).await;
    let mut startup = BusEvent::new(GPIO_ON, params(json!({}))).with_device_id("gpio-1");
    startup.startup = true;
    orchestrator.handle_event(&startup).await;
    assert_eq!(t.store.get(&id).await.unwrap().unwrap().on, Some(false));

    let on = BusEvent::new(GPIO_ON, params(json!({"init": false}))).with_device_id("gpio-1");
    orchestrator.handle_event(&on).await;
    assert_eq!(t.store.get(&id).await.unwrap().unwrap().on, Some(true));
    assert_eq!(rx.recv().await.unwrap().name(), "sensors.motion.on");
}

#[tokio::test]
async fn test_unmatched_gpio_events_are_dropped() {
    let t = test_context();
    let orchestrator = orchestrator(&t);
    let mut orphan = Device::new(SensorKind::Motion, "pir", "ghost");
    orphan.gpios.push(GpioRef {
        resource_id: "g9".into(),
        gpio: "GPIO4".into(),
        pin: 7,
    });
    orphan.on = Some(false);
    let orphan = t.store.add(orphan).await.unwrap().unwrap();

    orchestrator
        .handle_event(&BusEvent::new(GPIO_ON, Params::new()).with_device_id("nowhere"))
        .await;
    orchestrator
        .handle_event(&BusEvent::new(GPIO_ON, Params::new()).with_device_id("g9"))
        .await;
    orchestrator
        .handle_event(&BusEvent::new(GPIO_ON, Params::new()))
        .await;

    assert_eq!(t.store.get(&orphan.id).await.unwrap().unwrap().on, Some(false));
}

#[tokio::test]
async fn test_driver_events_reach_driver_owners() {
    let t = test_context();
    let orchestrator = orchestrator(&t);

    let installing = BusEvent::new(
        DRIVER_INSTALL,
        params(json!({"drivername": "onewire", "installing": true})),
    );
    orchestrator.handle_event(&installing).await;
    assert!(t.gpio.calls_of("reserve_gpio").is_empty());

    let installed = BusEvent::new(
        DRIVER_INSTALL,
        params(json!({"drivername": "onewire", "installing": false})),
    );
    orchestrator.handle_event(&installed).await;
    assert_eq!(t.gpio.calls_of("reserve_gpio"), vec!["reserve_gpio:GPIO4"]);
    assert!(t.gpio.get_reserved_gpio("onewire").await.unwrap().is_some());
}

// ─────────────────────────────────────────────────────────
// Lifecycle and queries
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_start_loads_board_and_resumes_pollers() {
    let gpio = Arc::new(FakeGpioService::with_board(BOARD));
    let store = Arc::new(FlakyDeviceStore::new());
    let ctx = HandlerContext::new(gpio.clone(), store.clone(), Arc::new(Settings::default()));
    let orchestrator = Orchestrator::with_default_handlers(ctx).unwrap();

    let mut kitchen = Device::new(SensorKind::Temperature, "onewire", "kitchen");
    kitchen.interval = Some(120);
    kitchen.path = Some(Path::new("/nonexistent/w1_slave").to_path_buf());
    let kitchen = store.add(kitchen).await.unwrap().unwrap();
    let motion = store
        .add(Device::new(SensorKind::Motion, "generic", "hall"))
        .await
        .unwrap()
        .unwrap();
    let orphan = store
        .add(Device::new(SensorKind::Motion, "pir", "ghost"))
        .await
        .unwrap()
        .unwrap();

    assert!(!orchestrator.context().has_board_gpio("GPIO17"));
    orchestrator.start().await;
    assert!(orchestrator.context().has_board_gpio("GPIO17"));

    assert!(orchestrator.pool().contains(&kitchen.id));
    assert!(!orchestrator.pool().contains(&motion.id));
    assert!(!orchestrator.pool().contains(&orphan.id));
    orchestrator.shutdown();
    assert!(orchestrator.pool().is_empty());
}

#[tokio::test]
async fn test_start_survives_board_failure() {
    let t = test_context();
    t.gpio.fail_command("get_raspi_gpios");
    let orchestrator = orchestrator(&t);
    orchestrator.start().await;
    assert!(orchestrator.context().board_gpios().is_empty());
}

#[tokio::test]
async fn test_module_config() {
    let t = test_context();
    let config = orchestrator(&t).module_config();

    assert_eq!(config["drivers"]["onewire"], json!(true));
    assert_eq!(
        config["sensorstypes"]["SensorDht22"],
        json!({"types": ["temperature", "humidity"], "subtype": "dht22"})
    );
    assert_eq!(
        config["sensorstypes"]["SensorMotionGeneric"]["subtype"],
        json!("generic")
    );
}

#[tokio::test]
async fn test_call_method() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("28-0316a2795bff")).unwrap();
    let mut settings = Settings::default();
    settings.onewire.devices_path = dir.path().to_path_buf();
    let t = test_context_with(settings);
    let orchestrator = orchestrator(&t);

    let err = orchestrator
        .call_method("format_disk", &Params::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownMethod { .. }));

    let devices = orchestrator
        .call_method("get_onewire_devices", &Params::new())
        .await
        .unwrap();
    assert_eq!(devices[0]["device"], json!("28-0316a2795bff"));
}

#[tokio::test]
async fn test_search_by_gpio() {
    let t = test_context();
    let orchestrator = orchestrator(&t);
    let devices = orchestrator
        .add_sensor("motion", "generic", &motion_params("hall", "GPIO18"))
        .await
        .unwrap();

    let found = orchestrator.search_by_gpio("gpio-1").await.unwrap().unwrap();
    assert_eq!(found.id, devices[0].id);
    assert!(orchestrator.search_by_gpio("gpio-9").await.unwrap().is_none());
    assert_eq!(orchestrator.devices().await.unwrap().len(), 1);
}
