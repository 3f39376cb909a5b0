//! Application error types with rich context

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Validation Errors (raised by kind handlers before any side effect)
    // ─────────────────────────────────────────────────────────────
    #[error("Parameter \"{field}\" is missing")]
    MissingParameter { field: String },

    #[error("{message}")]
    InvalidParameter { field: String, message: String },

    // ─────────────────────────────────────────────────────────────
    // Lookup Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Sensor type \"{kind}\" with subtype \"{subtype}\" is not supported")]
    UnsupportedKind { kind: String, subtype: String },

    #[error("Unhandled sensor type \"{kind}-{subtype}\"")]
    UnhandledDevice { kind: String, subtype: String },

    #[error("Sensor with uuid \"{id}\" doesn't exist")]
    DeviceNotFound { id: String },

    #[error("Method \"{name}\" is not exposed")]
    UnknownMethod { name: String },

    // ─────────────────────────────────────────────────────────────
    // Registration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Subtype \"{subtype}\" already registered in type \"{kind}\"")]
    SubtypeAlreadyRegistered { kind: String, subtype: String },

    #[error("Handler \"{name}\" is already registered")]
    HandlerAlreadyRegistered { name: String },

    // ─────────────────────────────────────────────────────────────
    // Collaborator Errors (GPIO service, device store, bus)
    // ─────────────────────────────────────────────────────────────
    #[error("Gpio service error: {message}")]
    Gpio { message: String },

    #[error("Device store error: {message}")]
    Store { message: String },

    #[error("{message}")]
    Command { message: String },

    /// A saga failed after acquiring resources. The cause is kept as source
    /// but the display text stays generic.
    #[error("{message}")]
    Operation {
        message: String,
        #[source]
        source: Box<Error>,
    },

    // ─────────────────────────────────────────────────────────────
    // Sensor Reading Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Process error: {message}")]
    Process { message: String },

    #[error("Sensor read error: {message}")]
    Read { message: String },

    #[error("{what} timed out")]
    Timeout { what: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ─────────────────────────────────────────────────────────────
    // Channel/Communication Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Channel send error: {message}")]
    ChannelSend { message: String },

    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn missing_parameter(field: impl Into<String>) -> Self {
        Self::MissingParameter {
            field: field.into(),
        }
    }

    pub fn invalid_parameter(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Invalid parameter error echoing the offending value
    pub fn invalid_value(field: impl Into<String>, specified: impl std::fmt::Display) -> Self {
        let field = field.into();
        let message = format!("Parameter \"{}\" is invalid (specified=\"{}\")", field, specified);
        Self::InvalidParameter { field, message }
    }

    pub fn unsupported_kind(kind: impl Into<String>, subtype: impl Into<String>) -> Self {
        Self::UnsupportedKind {
            kind: kind.into(),
            subtype: subtype.into(),
        }
    }

    pub fn unhandled_device(kind: impl Into<String>, subtype: impl Into<String>) -> Self {
        Self::UnhandledDevice {
            kind: kind.into(),
            subtype: subtype.into(),
        }
    }

    pub fn device_not_found(id: impl Into<String>) -> Self {
        Self::DeviceNotFound { id: id.into() }
    }

    pub fn unknown_method(name: impl Into<String>) -> Self {
        Self::UnknownMethod { name: name.into() }
    }

    pub fn subtype_already_registered(kind: impl Into<String>, subtype: impl Into<String>) -> Self {
        Self::SubtypeAlreadyRegistered {
            kind: kind.into(),
            subtype: subtype.into(),
        }
    }

    pub fn handler_already_registered(name: impl Into<String>) -> Self {
        Self::HandlerAlreadyRegistered { name: name.into() }
    }

    pub fn gpio(message: impl Into<String>) -> Self {
        Self::Gpio {
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    pub fn command(message: impl Into<String>) -> Self {
        Self::Command {
            message: message.into(),
        }
    }

    /// Wrap a saga failure cause behind a generic message
    pub fn operation(message: impl Into<String>, source: Error) -> Self {
        Self::Operation {
            message: message.into(),
            source: Box::new(source),
        }
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::Process {
            message: message.into(),
        }
    }

    pub fn read(message: impl Into<String>) -> Self {
        Self::Read {
            message: message.into(),
        }
    }

    pub fn timeout(what: impl Into<String>) -> Self {
        Self::Timeout { what: what.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn channel_send(message: impl Into<String>) -> Self {
        Self::ChannelSend {
            message: message.into(),
        }
    }

    /// Field name carried by a validation error
    pub fn field(&self) -> Option<&str> {
        match self {
            Error::MissingParameter { field } | Error::InvalidParameter { field, .. } => {
                Some(field)
            }
            _ => None,
        }
    }

    /// Check if this error was raised by parameter validation
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::MissingParameter { .. } | Error::InvalidParameter { .. }
        )
    }

    /// Check if this is a recoverable error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Gpio { .. }
                | Error::Store { .. }
                | Error::Command { .. }
                | Error::Operation { .. }
                | Error::Read { .. }
                | Error::Timeout { .. }
                | Error::ChannelSend { .. }
        ) || self.is_validation()
    }

    /// Check if this error should abort startup
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::SubtypeAlreadyRegistered { .. }
                | Error::HandlerAlreadyRegistered { .. }
                | Error::Config { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}
