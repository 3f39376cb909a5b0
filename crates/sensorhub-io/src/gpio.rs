//! Gpio service boundary
//!
//! The gpio service owns the physical gpio resources. [`GpioService`] is the
//! view the orchestrator has of it; [`BusGpioClient`] implements it over the
//! request/response bus.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use sensorhub_core::prelude::*;
use sensorhub_core::{BoardGpios, GpioResource, GpioSpec, ReserveSpec};

use crate::commands::{CommandSender, GpioCommand};

/// Operations of the external gpio service
///
/// Every call either returns a value or an error. Callers never retry.
#[cfg_attr(any(test, feature = "test-helpers"), mockall::automock)]
#[async_trait]
pub trait GpioService: Send + Sync {
    async fn add_gpio(&self, spec: &GpioSpec) -> Result<GpioResource>;

    async fn update_gpio(&self, spec: &GpioSpec) -> Result<GpioResource>;

    async fn delete_gpio(&self, resource_id: &str) -> Result<bool>;

    async fn is_reserved_gpio(&self, resource_id: &str) -> Result<bool>;

    /// First gpio reserved for a usage, `None` when nothing is reserved
    async fn get_reserved_gpio(&self, usage: &str) -> Result<Option<GpioResource>>;

    async fn get_reserved_gpios(&self, usage: &str) -> Result<Vec<GpioResource>>;

    async fn reserve_gpio(&self, spec: &ReserveSpec) -> Result<GpioResource>;

    /// Names of gpios already configured on the board
    async fn get_assigned_gpios(&self) -> Result<Vec<String>>;

    /// Gpio table of the board
    async fn get_raspi_gpios(&self) -> Result<BoardGpios>;

    async fn is_gpio_on(&self, gpio: &str) -> Result<bool>;
}

/// [`GpioService`] speaking to the gpio module over the bus
#[derive(Debug, Clone)]
pub struct BusGpioClient {
    sender: CommandSender,
    timeout: Duration,
}

impl BusGpioClient {
    pub fn new(sender: CommandSender, timeout: Duration) -> Self {
        Self { sender, timeout }
    }

    async fn call(&self, command: GpioCommand) -> Result<Value> {
        let name = command.name();
        let response = self.sender.send_with_timeout(command, self.timeout).await?;
        response.into_result().map_err(|e| {
            debug!("Gpio command '{}' failed: {}", name, e);
            Error::gpio(e.to_string())
        })
    }

    async fn call_as<T: DeserializeOwned>(&self, command: GpioCommand) -> Result<T> {
        let name = command.name();
        let data = self.call(command).await?;
        serde_json::from_value(data)
            .map_err(|e| Error::gpio(format!("Invalid '{}' response: {}", name, e)))
    }
}

#[async_trait]
impl GpioService for BusGpioClient {
    async fn add_gpio(&self, spec: &GpioSpec) -> Result<GpioResource> {
        self.call_as(GpioCommand::AddGpio(spec.clone())).await
    }

    async fn update_gpio(&self, spec: &GpioSpec) -> Result<GpioResource> {
        self.call_as(GpioCommand::UpdateGpio(spec.clone())).await
    }

    async fn delete_gpio(&self, resource_id: &str) -> Result<bool> {
        let data = self
            .call(GpioCommand::DeleteGpio {
                resource_id: resource_id.to_string(),
            })
            .await?;
        Ok(data.as_bool().unwrap_or(true))
    }

    async fn is_reserved_gpio(&self, resource_id: &str) -> Result<bool> {
        self.call_as(GpioCommand::IsReservedGpio {
            resource_id: resource_id.to_string(),
        })
        .await
    }

    async fn get_reserved_gpio(&self, usage: &str) -> Result<Option<GpioResource>> {
        self.call_as(GpioCommand::GetReservedGpio {
            usage: usage.to_string(),
        })
        .await
    }

    async fn get_reserved_gpios(&self, usage: &str) -> Result<Vec<GpioResource>> {
        let data = self
            .call(GpioCommand::GetReservedGpios {
                usage: usage.to_string(),
            })
            .await?;
        if data.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(data)
            .map_err(|e| Error::gpio(format!("Invalid 'get_reserved_gpios' response: {}", e)))
    }

    async fn reserve_gpio(&self, spec: &ReserveSpec) -> Result<GpioResource> {
        self.call_as(GpioCommand::ReserveGpio(spec.clone())).await
    }

    async fn get_assigned_gpios(&self) -> Result<Vec<String>> {
        self.call_as(GpioCommand::GetAssignedGpios).await
    }

    async fn get_raspi_gpios(&self) -> Result<BoardGpios> {
        self.call_as(GpioCommand::GetRaspiGpios).await
    }

    async fn is_gpio_on(&self, gpio: &str) -> Result<bool> {
        self.call_as(GpioCommand::IsGpioOn {
            gpio: gpio.to_string(),
        })
        .await
    }
}
