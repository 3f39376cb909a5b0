//! Built-in kind handlers
//!
//! - [`MotionGenericHandler`] - motion sensors on a plain input gpio
//! - [`OnewireHandler`] - DS18B20 temperature probes on the one-wire bus
//! - [`Dht22Handler`] - DHT22 temperature + humidity pairs

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::json;

use sensorhub_core::prelude::*;

use crate::context::HandlerContext;
use crate::params::ensure;
use crate::task::PollingTask;

pub mod dht22;
pub mod motion;
pub mod onewire;

pub use dht22::Dht22Handler;
pub use motion::MotionGenericHandler;
pub use onewire::OnewireHandler;

/// Fail when another device already uses `name`. `current` is the name of the
/// device being updated, which may keep its own name.
pub(crate) async fn ensure_unique_name(
    ctx: &HandlerContext,
    name: &str,
    current: Option<&str>,
) -> Result<()> {
    if current == Some(name) {
        return Ok(());
    }
    let existing = ctx.search_device("name", &json!(name)).await?;
    ensure(
        existing.is_none(),
        "name",
        format!("Name \"{}\" is already used", name),
    )
}

pub(crate) fn ensure_free_gpio(assigned: &[String], gpio: &str) -> Result<()> {
    ensure(
        !assigned.iter().any(|g| g == gpio),
        "gpio",
        format!("Gpio \"{}\" is already used", gpio),
    )
}

pub(crate) fn ensure_board_gpio(ctx: &HandlerContext, gpio: &str) -> Result<()> {
    ensure(
        ctx.has_board_gpio(gpio),
        "gpio",
        format!("Gpio \"{}\" does not exist for this raspberry pi", gpio),
    )
}

/// Polling tasks of a handler keyed by grouping
///
/// A task is handed out again until it has been stopped.
#[derive(Debug, Default)]
pub(crate) struct TaskMemo {
    tasks: Mutex<HashMap<String, PollingTask>>,
}

impl TaskMemo {
    pub fn get_or_create(&self, key: &str, create: impl FnOnce() -> PollingTask) -> PollingTask {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|_, task| !task.is_stopped());

        if let Some(task) = tasks.get(key) {
            return task.clone();
        }

        let task = create();
        tasks.insert(key.to_string(), task.clone());
        task
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
