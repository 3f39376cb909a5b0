//! Mapping of device ids to running pollers
//!
//! Several ids may point at the same [`PollingTask`]. Stopping through any
//! of them stops the shared task, then every entry whose task is no longer
//! running is dropped, which clears the sibling ids in the same pass.

use std::collections::HashMap;
use std::sync::Mutex;

use sensorhub_core::prelude::*;
use sensorhub_core::Device;

use crate::task::PollingTask;

#[derive(Debug, Default)]
pub struct TaskPool {
    tasks: Mutex<HashMap<String, PollingTask>>,
}

impl TaskPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, HashMap<String, PollingTask>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bind a task under every device id and start it
    pub fn start(&self, task: Option<PollingTask>, device_ids: &[String]) {
        let Some(task) = task else {
            return;
        };
        if device_ids.is_empty() {
            return;
        }

        let mut tasks = self.tasks();
        for id in device_ids {
            tasks.insert(id.clone(), task.clone());
        }
        task.start();
        debug!("Task '{}' bound to {:?}", task.name(), device_ids);
    }

    /// Stop the task bound to a device and forget every id it was bound to
    pub fn stop(&self, device: &Device) {
        self.stop_id(&device.id);
    }

    pub fn stop_id(&self, device_id: &str) {
        let mut tasks = self.tasks();
        let Some(task) = tasks.get(device_id) else {
            warn!("No task found for device {}", device_id);
            return;
        };

        task.stop();
        tasks.retain(|_, task| task.is_running());
        debug!("Task for device {} stopped, {} left", device_id, tasks.len());
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.tasks().contains_key(device_id)
    }

    pub fn task_for(&self, device_id: &str) -> Option<PollingTask> {
        self.tasks().get(device_id).cloned()
    }

    /// Ids sharing the task bound to `device_id`, sorted, itself included
    pub fn bound_ids(&self, device_id: &str) -> Vec<String> {
        let tasks = self.tasks();
        let Some(task) = tasks.get(device_id) else {
            return Vec::new();
        };
        let mut ids: Vec<String> = tasks
            .iter()
            .filter(|(_, other)| other.same_as(task))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks().is_empty()
    }

    /// Stop every task
    pub fn stop_all(&self) {
        let mut tasks = self.tasks();
        for task in tasks.values() {
            task.stop();
        }
        let count = tasks.len();
        tasks.clear();
        info!("Stopped tasks of {} devices", count);
    }
}
