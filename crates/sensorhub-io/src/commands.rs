//! Command building and request tracking for the gpio bus
//!
//! This module provides:
//! - Request ID tracking for matching responses
//! - Command building for the NDJSON request format
//! - Timeout handling for stalled commands

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, RwLock};

use sensorhub_core::prelude::*;
use sensorhub_core::{GpioSpec, ReserveSpec};

/// Global request ID counter
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a unique request ID
pub fn next_request_id() -> u64 {
    REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// A pending request awaiting response
struct PendingRequest {
    response_tx: oneshot::Sender<CommandResponse>,
    created_at: Instant,
    description: String,
}

/// Response to a bus command
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CommandResponse {
    pub id: u64,
    #[serde(default)]
    pub error: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

impl CommandResponse {
    /// Create a success response
    pub fn success(id: u64, data: Value) -> Self {
        Self {
            id,
            error: false,
            message: String::new(),
            data,
        }
    }

    /// Create an error response
    pub fn error(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            error: true,
            message: message.into(),
            data: Value::Null,
        }
    }

    /// Payload of a successful response, command error otherwise
    pub fn into_result(self) -> Result<Value> {
        if self.error {
            Err(Error::command(self.message))
        } else {
            Ok(self.data)
        }
    }
}

/// Tracks pending requests and matches responses
pub struct RequestTracker {
    pending: Arc<RwLock<HashMap<u64, PendingRequest>>>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a new pending request
    /// Returns (request_id, receiver for response)
    pub async fn register(&self, description: &str) -> (u64, oneshot::Receiver<CommandResponse>) {
        let id = next_request_id();
        let (tx, rx) = oneshot::channel();

        let pending = PendingRequest {
            response_tx: tx,
            created_at: Instant::now(),
            description: description.to_string(),
        };

        self.pending.write().await.insert(id, pending);

        (id, rx)
    }

    /// Handle an incoming response from the bus
    /// Returns true if the response was matched to a pending request
    pub async fn handle_response(&self, response: CommandResponse) -> bool {
        if let Some(pending) = self.pending.write().await.remove(&response.id) {
            trace!("Response #{} matched '{}'", response.id, pending.description);
            let _ = pending.response_tx.send(response);
            true
        } else {
            false
        }
    }

    /// Forget a pending request without answering it
    pub async fn forget(&self, id: u64) -> bool {
        self.pending.write().await.remove(&id).is_some()
    }

    /// Cancel all pending requests (e.g., on shutdown)
    pub async fn cancel_all(&self) {
        let mut pending = self.pending.write().await;
        for (id, req) in pending.drain() {
            let _ = req
                .response_tx
                .send(CommandResponse::error(id, "Request cancelled"));
        }
    }

    /// Remove stale requests that have timed out
    pub async fn cleanup_stale(&self, timeout: Duration) -> Vec<u64> {
        let mut pending = self.pending.write().await;
        let now = Instant::now();

        let stale: Vec<u64> = pending
            .iter()
            .filter(|(_, req)| now.duration_since(req.created_at) >= timeout)
            .map(|(id, _)| *id)
            .collect();

        for id in &stale {
            if let Some(req) = pending.remove(id) {
                debug!("Dropping stale request #{} '{}'", id, req.description);
                let _ = req
                    .response_tx
                    .send(CommandResponse::error(*id, "Request timed out"));
            }
        }

        stale
    }

    /// Get the number of pending requests
    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Commands understood by the gpio service
#[derive(Debug, Clone, PartialEq)]
pub enum GpioCommand {
    AddGpio(GpioSpec),
    UpdateGpio(GpioSpec),
    DeleteGpio { resource_id: String },
    IsReservedGpio { resource_id: String },
    GetReservedGpio { usage: String },
    GetReservedGpios { usage: String },
    ReserveGpio(ReserveSpec),
    GetAssignedGpios,
    GetRaspiGpios,
    IsGpioOn { gpio: String },
}

impl GpioCommand {
    /// Command name on the bus
    pub fn name(&self) -> &'static str {
        match self {
            GpioCommand::AddGpio(_) => "add_gpio",
            GpioCommand::UpdateGpio(_) => "update_gpio",
            GpioCommand::DeleteGpio { .. } => "delete_gpio",
            GpioCommand::IsReservedGpio { .. } => "is_reserved_gpio",
            GpioCommand::GetReservedGpio { .. } => "get_reserved_gpio",
            GpioCommand::GetReservedGpios { .. } => "get_reserved_gpios",
            GpioCommand::ReserveGpio(_) => "reserve_gpio",
            GpioCommand::GetAssignedGpios => "get_assigned_gpios",
            GpioCommand::GetRaspiGpios => "get_raspi_gpios",
            GpioCommand::IsGpioOn { .. } => "is_gpio_on",
        }
    }

    fn params(&self) -> Result<Value> {
        let params = match self {
            GpioCommand::AddGpio(spec) | GpioCommand::UpdateGpio(spec) => {
                serde_json::to_value(spec)?
            }
            GpioCommand::DeleteGpio { resource_id } => json!({ "uuid": resource_id }),
            GpioCommand::IsReservedGpio { resource_id } => json!({ "gpio": resource_id }),
            GpioCommand::GetReservedGpio { usage } | GpioCommand::GetReservedGpios { usage } => {
                json!({ "usage": usage })
            }
            GpioCommand::ReserveGpio(spec) => serde_json::to_value(spec)?,
            GpioCommand::GetAssignedGpios | GpioCommand::GetRaspiGpios => json!({}),
            GpioCommand::IsGpioOn { gpio } => json!({ "gpio": gpio }),
        };
        Ok(params)
    }

    /// Build the request line
    pub fn build(&self, id: u64) -> Result<String> {
        Ok(json!({
            "kind": "request",
            "id": id,
            "to": "gpios",
            "command": self.name(),
            "params": self.params()?,
        })
        .to_string())
    }

    /// Get a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            GpioCommand::AddGpio(_) => "add gpio",
            GpioCommand::UpdateGpio(_) => "update gpio",
            GpioCommand::DeleteGpio { .. } => "delete gpio",
            GpioCommand::IsReservedGpio { .. } => "check reserved gpio",
            GpioCommand::GetReservedGpio { .. } => "get reserved gpio",
            GpioCommand::GetReservedGpios { .. } => "get reserved gpios",
            GpioCommand::ReserveGpio(_) => "reserve gpio",
            GpioCommand::GetAssignedGpios => "get assigned gpios",
            GpioCommand::GetRaspiGpios => "get board gpios",
            GpioCommand::IsGpioOn { .. } => "read gpio level",
        }
    }
}

/// Sends commands on the bus with request tracking
#[derive(Clone)]
pub struct CommandSender {
    /// Channel carrying request lines to the bus writer
    line_tx: mpsc::Sender<String>,
    tracker: Arc<RequestTracker>,
}

impl std::fmt::Debug for CommandSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSender")
            .field("line_tx", &"<channel>")
            .field("tracker", &"<tracker>")
            .finish()
    }
}

impl CommandSender {
    pub fn new(line_tx: mpsc::Sender<String>, tracker: Arc<RequestTracker>) -> Self {
        Self { line_tx, tracker }
    }

    /// Send a command and wait for its response
    pub async fn send_with_timeout(
        &self,
        command: GpioCommand,
        timeout: Duration,
    ) -> Result<CommandResponse> {
        let (id, response_rx) = self.tracker.register(command.description()).await;

        let line = match command.build(id) {
            Ok(line) => line,
            Err(e) => {
                self.tracker.forget(id).await;
                return Err(e);
            }
        };

        debug!("Sending command #{}: {}", id, command.description());

        if self.line_tx.send(line).await.is_err() {
            self.tracker.forget(id).await;
            return Err(Error::channel_send("bus writer"));
        }

        match tokio::time::timeout(timeout, response_rx).await {
            Ok(Ok(response)) => {
                debug!("Command #{} completed: error={}", id, response.error);
                Ok(response)
            }
            Ok(Err(_)) => Err(Error::ChannelClosed),
            Err(_) => {
                self.tracker.forget(id).await;
                Err(Error::timeout(format!(
                    "Command '{}' after {:?}",
                    command.name(),
                    timeout
                )))
            }
        }
    }

    /// Get the request tracker (for response handling)
    pub fn tracker(&self) -> &Arc<RequestTracker> {
        &self.tracker
    }
}
