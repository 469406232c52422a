//! Weather forecast records: the resource served from cache and published to the queue.
//!
//! # Wire format
//!
//! Records serialize to JSON objects with `PascalCase` keys:
//!
//! ```json
//! {"Date":"2026-10-20","TemperatureC":12,"Summary":"Mild","TemperatureF":53}
//! ```
//!
//! `TemperatureF` is derived and always written; it is ignored when reading,
//! so a cached value round-trips to the exact record that was written.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Fixed vocabulary that forecast summaries are drawn from.
pub const SUMMARIES: [&str; 10] = [
    "Freezing",
    "Bracing",
    "Chilly",
    "Cool",
    "Mild",
    "Warm",
    "Balmy",
    "Hot",
    "Sweltering",
    "Scorching",
];

/// Number of records in a generated forecast.
pub const FORECAST_DAYS: u64 = 5;

/// Lowest generated Celsius temperature (inclusive).
pub const MIN_TEMPERATURE_C: i32 = -20;

/// Highest generated Celsius temperature (inclusive).
pub const MAX_TEMPERATURE_C: i32 = 54;

/// Divisor of the Celsius-to-Fahrenheit conversion. Not the exact 5/9.
const FAHRENHEIT_DIVISOR: f64 = 0.5556;

/// A full forecast as cached and published: one record per day, in date order.
pub type Forecast = Vec<WeatherForecast>;

/// One day of forecast data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ForecastWire", into = "ForecastWire")]
pub struct WeatherForecast {
    pub date: NaiveDate,
    pub temperature_c: i32,
    pub summary: Option<String>,
}

impl WeatherForecast {
    #[must_use]
    pub fn new(date: NaiveDate, temperature_c: i32, summary: Option<String>) -> Self {
        Self {
            date,
            temperature_c,
            summary,
        }
    }

    /// Fahrenheit temperature derived from [`Self::temperature_c`].
    #[must_use]
    pub fn temperature_f(&self) -> i32 {
        celsius_to_fahrenheit(self.temperature_c)
    }
}

/// Converts Celsius to Fahrenheit as `32 + round(celsius / 0.5556)`.
///
/// Rounds half away from zero. The approximate divisor is part of the
/// contract: consumers compare published values against this exact rule.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn celsius_to_fahrenheit(celsius: i32) -> i32 {
    32 + (f64::from(celsius) / FAHRENHEIT_DIVISOR).round() as i32
}

/// Serialized shape of a [`WeatherForecast`].
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ForecastWire {
    date: NaiveDate,
    temperature_c: i32,
    summary: Option<String>,
    #[serde(default, rename = "TemperatureF", skip_deserializing)]
    temperature_f: i32,
}

impl From<ForecastWire> for WeatherForecast {
    fn from(wire: ForecastWire) -> Self {
        Self {
            date: wire.date,
            temperature_c: wire.temperature_c,
            summary: wire.summary,
        }
    }
}

impl From<WeatherForecast> for ForecastWire {
    fn from(forecast: WeatherForecast) -> Self {
        let temperature_f = forecast.temperature_f();
        Self {
            date: forecast.date,
            temperature_c: forecast.temperature_c,
            summary: forecast.summary,
            temperature_f,
        }
    }
}
