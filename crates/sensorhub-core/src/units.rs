//! Temperature unit conversion

use crate::types::TemperatureUnit;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

fn to_celsius(fahrenheit: f64) -> f64 {
    (fahrenheit - 32.0) * 5.0 / 9.0
}

/// Convert a raw celsius reading to `(celsius, fahrenheit)` applying an offset
///
/// A zero offset is ignored. A celsius offset is added to the celsius value,
/// a fahrenheit offset to the fahrenheit value. Both results are rounded to
/// 2 decimals.
pub fn convert_from_celsius(celsius: f64, offset: i64, unit: TemperatureUnit) -> (f64, f64) {
    let (c, f) = match (offset, unit) {
        (0, _) => (celsius, to_fahrenheit(celsius)),
        (offset, TemperatureUnit::Celsius) => {
            let c = celsius + offset as f64;
            (c, to_fahrenheit(c))
        }
        (offset, TemperatureUnit::Fahrenheit) => {
            let f = to_fahrenheit(celsius) + offset as f64;
            (to_celsius(f), f)
        }
    };
    (round2(c), round2(f))
}

/// Convert a raw fahrenheit reading to `(celsius, fahrenheit)` applying an offset
pub fn convert_from_fahrenheit(fahrenheit: f64, offset: i64, unit: TemperatureUnit) -> (f64, f64) {
    let (c, f) = match (offset, unit) {
        (0, _) => (to_celsius(fahrenheit), fahrenheit),
        (offset, TemperatureUnit::Celsius) => {
            let c = to_celsius(fahrenheit) + offset as f64;
            (c, to_fahrenheit(c))
        }
        (offset, TemperatureUnit::Fahrenheit) => {
            let f = fahrenheit + offset as f64;
            (to_celsius(f), f)
        }
    };
    (round2(c), round2(f))
}
