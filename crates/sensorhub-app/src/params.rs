//! Request parameter validation
//!
//! Checks run in the order a handler calls them so the first violated rule
//! is the one reported.

use serde_json::Value;

use sensorhub_core::prelude::*;
use sensorhub_core::{Params, TemperatureUnit};

/// Longest accepted polling interval, one week
pub const MAX_INTERVAL_SECS: u64 = 7 * 24 * 3600;

/// Typed access to request parameters
#[derive(Debug, Clone, Copy)]
pub struct ParamReader<'a> {
    params: &'a Params,
}

fn wrong_type(field: &str, type_name: &str) -> Error {
    Error::invalid_parameter(
        field,
        format!("Parameter \"{}\" must be of type \"{}\"", field, type_name),
    )
}

impl<'a> ParamReader<'a> {
    pub fn new(params: &'a Params) -> Self {
        Self { params }
    }

    fn value(&self, field: &str) -> Result<&'a Value> {
        match self.params.get(field) {
            None | Some(Value::Null) => Err(Error::missing_parameter(field)),
            Some(value) => Ok(value),
        }
    }

    /// Non-empty string
    pub fn str(&self, field: &str) -> Result<&'a str> {
        let value = self
            .value(field)?
            .as_str()
            .ok_or_else(|| wrong_type(field, "str"))?;
        if value.is_empty() {
            return Err(Error::invalid_value(field, value));
        }
        Ok(value)
    }

    pub fn bool(&self, field: &str) -> Result<bool> {
        self.value(field)?
            .as_bool()
            .ok_or_else(|| wrong_type(field, "bool"))
    }

    /// Integer, integral floats accepted
    pub fn int(&self, field: &str) -> Result<i64> {
        let value = self.value(field)?;
        value
            .as_i64()
            .or_else(|| {
                value
                    .as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| f as i64)
            })
            .ok_or_else(|| wrong_type(field, "int"))
    }

    /// Polling interval in seconds, between `min` and [`MAX_INTERVAL_SECS`]
    pub fn interval(&self, field: &str, min: u64) -> Result<u64> {
        let value = self.int(field)?;
        let message = format!("Interval must be greater or equal than {}", min);
        ensure(value >= min as i64, field, message)?;
        let message = format!("Interval must be lower or equal than {}", MAX_INTERVAL_SECS);
        ensure(value as u64 <= MAX_INTERVAL_SECS, field, message)?;
        Ok(value as u64)
    }

    /// Temperature offset unit
    pub fn offset_unit(&self, field: &str) -> Result<TemperatureUnit> {
        let value = self.str(field)?;
        TemperatureUnit::parse(value).ok_or_else(|| {
            Error::invalid_parameter(
                field,
                "Offset_unit value must be either \"celsius\" or \"fahrenheit\"",
            )
        })
    }
}

/// Invalid parameter error unless `condition` holds
pub fn ensure(condition: bool, field: &str, message: impl Into<String>) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(Error::invalid_parameter(field, message))
    }
}
