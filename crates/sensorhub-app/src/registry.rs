//! Kind handler registry
//!
//! Maps handler names and `(kind, subtype)` pairs to their handler and keeps
//! the table of handler methods exposed on the orchestrator. Built once at
//! startup.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use sensorhub_core::prelude::*;
use sensorhub_core::{Device, SensorKind};

use crate::handler::KindHandler;

/// Handler hooks never reachable by name
const BLACKLIST: &[&str] = &[
    "add_gpio",
    "update_gpio",
    "get_reserved_gpio",
    "update_value",
    "update",
    "add",
    "delete",
    "get_task",
    "process_event",
    "has_drivers",
    "send_command",
];

/// Operations of the orchestrator itself
pub const ORCHESTRATOR_METHODS: &[&str] = &[
    "add_sensor",
    "update_sensor",
    "delete_sensor",
    "get_module_config",
    "get_devices",
];

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn KindHandler>>,
    by_name: HashMap<&'static str, Arc<dyn KindHandler>>,
    by_kind: HashMap<(SensorKind, String), Arc<dyn KindHandler>>,
    methods: BTreeMap<String, Arc<dyn KindHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field(
                "handlers",
                &self.handlers.iter().map(|h| h.name()).collect::<Vec<_>>(),
            )
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for every kind it declares
    ///
    /// Fails without touching the registry when its name or one of its
    /// `(kind, subtype)` pairs is already claimed.
    pub fn register(&mut self, handler: Arc<dyn KindHandler>) -> Result<()> {
        if self.by_name.contains_key(handler.name()) {
            return Err(Error::handler_already_registered(handler.name()));
        }
        let subtype = handler.subtype();
        if let Some(kind) = handler
            .kinds()
            .iter()
            .find(|kind| self.by_kind.contains_key(&(**kind, subtype.to_string())))
        {
            return Err(Error::subtype_already_registered(kind.as_str(), subtype));
        }

        for kind in handler.kinds() {
            self.by_kind
                .insert((*kind, subtype.to_string()), handler.clone());
        }
        self.by_name.insert(handler.name(), handler.clone());
        self.expose_methods(&handler);
        info!(
            "Registered {} for {:?}/{}",
            handler.name(),
            handler.kinds(),
            subtype
        );
        self.handlers.push(handler);
        Ok(())
    }

    fn expose_methods(&mut self, handler: &Arc<dyn KindHandler>) {
        for method in handler.public_methods() {
            if BLACKLIST.contains(method) {
                debug!("{}: method {} is internal, not exposed", handler.name(), method);
                continue;
            }
            if ORCHESTRATOR_METHODS.contains(method) || self.methods.contains_key(*method) {
                warn!(
                    "{}: method {} already exists, not exposed",
                    handler.name(),
                    method
                );
                continue;
            }
            self.methods.insert(method.to_string(), handler.clone());
        }
    }

    pub fn resolve(&self, kind: SensorKind, subtype: &str) -> Option<Arc<dyn KindHandler>> {
        self.by_kind.get(&(kind, subtype.to_string())).cloned()
    }

    /// Resolve a handler from request strings
    pub fn resolve_request(&self, kind: &str, subtype: &str) -> Result<Arc<dyn KindHandler>> {
        SensorKind::parse(kind)
            .and_then(|k| self.resolve(k, subtype))
            .ok_or_else(|| Error::unsupported_kind(kind, subtype))
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<dyn KindHandler>> {
        self.by_name.get(name).cloned()
    }

    pub fn resolve_device(&self, device: &Device) -> Option<Arc<dyn KindHandler>> {
        self.resolve(device.kind, &device.subtype)
    }

    /// Registered handlers in registration order
    pub fn handlers(&self) -> &[Arc<dyn KindHandler>] {
        &self.handlers
    }

    /// Handler owning an exposed method
    pub fn method(&self, name: &str) -> Option<Arc<dyn KindHandler>> {
        self.methods.get(name).cloned()
    }

    pub fn method_names(&self) -> Vec<&str> {
        self.methods.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
