//! # sensorhub-io - External Collaborators
//!
//! Everything sensorhub talks to outside its own process state.
//!
//! Depends on [`sensorhub_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Gpio Bus
//! - [`GpioService`] - Operations of the external gpio service
//! - [`BusGpioClient`] - [`GpioService`] over the request/response bus
//! - [`CommandSender`], [`RequestTracker`] - Request lines out, responses matched back
//!
//! ### Device Store
//! - [`DeviceStore`] - Persistence of device records
//! - [`MemoryDeviceStore`] - In-memory store with optional JSON file mirror
//!
//! ### Sensor Readers
//! - [`onewire`] - `w1_slave` parsing and probe discovery
//! - [`dht22`] - External reader invocation with hard timeout
//!
//! ### Drivers
//! - [`Driver`], [`OnewireDriver`] - Installed state of system drivers

pub mod commands;
pub mod dht22;
pub mod drivers;
pub mod gpio;
pub mod onewire;
pub mod store;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

pub use commands::{CommandResponse, CommandSender, GpioCommand, RequestTracker};
pub use dht22::Dht22Reading;
pub use drivers::{Driver, OnewireDriver, ONEWIRE_DRIVER};
pub use gpio::{BusGpioClient, GpioService};
pub use onewire::OnewireDevice;
pub use store::{DeviceStore, MemoryDeviceStore};

#[cfg(any(test, feature = "test-helpers"))]
pub use gpio::MockGpioService;
#[cfg(any(test, feature = "test-helpers"))]
pub use store::MockDeviceStore;
