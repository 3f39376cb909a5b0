//! # sensorhub-core - Core Domain Types
//!
//! Foundation crate for sensorhub. Provides the device and gpio records,
//! error handling, bus event shapes, temperature conversion and logging
//! setup.
//!
//! This crate has **zero internal dependencies**.
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`Device`] - A persisted sensor record
//! - [`GpioRef`], [`GpioResource`], [`GpioSpec`], [`ReserveSpec`] - Gpio resource views
//! - [`ResourcePlan`] - Resources a kind handler asks to provision or remove
//! - [`SensorKind`], [`TemperatureUnit`]
//!
//! ### Events (`events`)
//! - [`BusEvent`] - Inbound gpio and driver notifications
//! - [`SensorEvent`] - Outbound value changes
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error enum with validation/fatal/recoverable classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! ```rust
//! use sensorhub_core::prelude::*;
//! ```

pub mod error;
pub mod events;
pub mod logging;
pub mod types;
pub mod units;

/// Prelude for common imports used throughout all sensorhub crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

pub use error::{Error, Result, ResultExt};
pub use events::{BusEvent, SensorEvent};
pub use types::{
    BoardGpios, Device, DeviceId, GpioMode, GpioRef, GpioResource, GpioSpec, Params,
    ReserveSpec, ResourcePlan, SensorKind, TemperatureUnit,
};
pub use types::unix_now;
pub use units::{convert_from_celsius, convert_from_fahrenheit};
