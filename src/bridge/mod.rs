//! NDJSON bridge between the bus and the orchestrator
//!
//! One JSON object per line on each side, tagged by `kind`.
//!
//! # Inbound (stdin)
//!
//! ```json
//! {"kind":"response","id":3,"error":false,"message":"","data":{"uuid":"g1","gpio":"GPIO18","pin":12}}
//! {"kind":"command","id":"c1","command":"add_sensor","params":{"type":"motion","subtype":"generic","name":"hall","gpio":"GPIO18","inverted":false}}
//! {"kind":"event","event":"gpios.gpio.on","params":{"init":false},"device_id":"g1"}
//! ```
//!
//! # Outbound (stdout)
//!
//! ```json
//! {"kind":"request","id":3,"to":"gpios","command":"add_gpio","params":{...}}
//! {"kind":"reply","id":"c1","error":false,"message":"","data":[...]}
//! {"kind":"event","event":"sensors.motion.on","device_id":"d1","params":{"sensor":"hall","lastupdate":1704700001}}
//! ```

pub mod runner;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use sensorhub_core::prelude::*;
use sensorhub_core::{BusEvent, Params, SensorEvent};
use sensorhub_io::CommandResponse;

pub use runner::{run, Bridge};

/// Line received from the bus
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Reply of the GPIO service to one of our requests
    Response(CommandResponse),

    /// Request addressed to us
    Command(BridgeCommand),

    Event(BusEvent),
}

impl InboundMessage {
    pub fn parse(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeCommand {
    /// Caller chosen id echoed in the reply
    #[serde(default)]
    pub id: Value,
    pub command: String,
    #[serde(default)]
    pub params: Params,
}

/// Line sent to the bus
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundMessage {
    Reply {
        id: Value,
        error: bool,
        message: String,
        data: Value,
    },
    Event {
        event: String,
        device_id: String,
        params: Value,
    },
}

impl OutboundMessage {
    /// Reply carrying either the result or the error message of a command
    pub fn reply(id: Value, result: Result<Value>) -> Self {
        match result {
            Ok(data) => Self::Reply {
                id,
                error: false,
                message: String::new(),
                data,
            },
            Err(e) => Self::Reply {
                id,
                error: true,
                message: e.to_string(),
                data: Value::Null,
            },
        }
    }

    pub fn event(event: &SensorEvent) -> Self {
        Self::Event {
            event: event.name().to_string(),
            device_id: event.device_id().to_string(),
            params: event.params(),
        }
    }

    /// Serialize as one NDJSON line, without the newline
    pub fn to_line(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(line) => Some(line),
            Err(e) => {
                error!("Failed to serialize bridge message: {}", e);
                None
            }
        }
    }
}
