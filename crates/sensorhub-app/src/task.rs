//! Periodic background pollers
//!
//! A [`PollingTask`] runs its [`PollJob`] once per period on the tokio
//! runtime. Clones share the same underlying task, so one poller can be bound
//! to several device ids.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use sensorhub_core::prelude::*;

/// Work done on every tick
#[async_trait]
pub trait PollJob: Send + Sync + 'static {
    async fn run(&self);
}

enum TaskState {
    Idle,
    Running {
        shutdown_tx: watch::Sender<bool>,
        handle: JoinHandle<()>,
    },
    Stopped,
}

struct TaskInner {
    name: String,
    period: Duration,
    job: Arc<dyn PollJob>,
    state: Mutex<TaskState>,
}

/// Shared handle on a periodic poller
#[derive(Clone)]
pub struct PollingTask {
    inner: Arc<TaskInner>,
}

impl std::fmt::Debug for PollingTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingTask")
            .field("name", &self.inner.name)
            .field("period", &self.inner.period)
            .field("running", &self.is_running())
            .finish()
    }
}

impl PollingTask {
    pub fn new(name: impl Into<String>, period: Duration, job: Arc<dyn PollJob>) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                name: name.into(),
                period,
                job,
                state: Mutex::new(TaskState::Idle),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn period(&self) -> Duration {
        self.inner.period
    }

    fn state(&self) -> std::sync::MutexGuard<'_, TaskState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Spawn the poller. No-op unless the task is idle; a stopped task is
    /// never restarted. A zero or unrepresentable period leaves the task idle.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut state = self.state();
        if !matches!(*state, TaskState::Idle) {
            return false;
        }

        let period = self.inner.period;
        let first_tick = match tokio::time::Instant::now().checked_add(period) {
            Some(at) if !period.is_zero() => at,
            _ => {
                error!(
                    "Polling task '{}' not started: invalid period {:?}",
                    self.inner.name, period
                );
                return false;
            }
        };

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let job = self.inner.job.clone();
        let name = self.inner.name.clone();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval_at(first_tick, period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        trace!("Polling task '{}' tick", name);
                        job.run().await;
                    }

                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            debug!("Polling task '{}' stopped", name);
                            break;
                        }
                    }
                }
            }
        });

        debug!(
            "Polling task '{}' started (every {:?})",
            self.inner.name, self.inner.period
        );
        *state = TaskState::Running {
            shutdown_tx,
            handle,
        };
        true
    }

    /// Stop the poller. Idempotent and returns without waiting on a tick in
    /// progress.
    pub fn stop(&self) {
        let mut state = self.state();
        if let TaskState::Running {
            shutdown_tx,
            handle,
        } = std::mem::replace(&mut *state, TaskState::Stopped)
        {
            let _ = shutdown_tx.send(true);
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        match &*self.state() {
            TaskState::Running { handle, .. } => !handle.is_finished(),
            _ => false,
        }
    }

    pub fn is_stopped(&self) -> bool {
        matches!(*self.state(), TaskState::Stopped)
    }

    /// Whether both handles point to the same poller
    pub fn same_as(&self, other: &PollingTask) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
