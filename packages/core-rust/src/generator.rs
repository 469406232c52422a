//! Producers of fresh resources, invoked by the pipeline on a cache miss.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Days;
use rand::Rng;

use crate::clock::{ClockSource, SystemClock};
use crate::forecast::{
    Forecast, WeatherForecast, FORECAST_DAYS, MAX_TEMPERATURE_C, MIN_TEMPERATURE_C, SUMMARIES,
};

/// Computes a fresh resource of type `T`.
///
/// A failure here is fatal to the request: there is nothing to fall back to.
#[async_trait]
pub trait ResourceGenerator<T>: Send + Sync {
    async fn generate(&self) -> anyhow::Result<T>;
}

/// Generates a random five-day forecast starting tomorrow.
pub struct RandomForecastGenerator {
    clock: Arc<dyn ClockSource>,
}

impl RandomForecastGenerator {
    /// Creates a generator dated by the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a generator dated by `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn ClockSource>) -> Self {
        Self { clock }
    }

    fn build(&self) -> anyhow::Result<Forecast> {
        let today = self.clock.now().date_naive();
        let mut rng = rand::rng();

        (1..=FORECAST_DAYS)
            .map(|offset| -> anyhow::Result<WeatherForecast> {
                let date = today
                    .checked_add_days(Days::new(offset))
                    .ok_or_else(|| anyhow::anyhow!("forecast date out of range: {today} + {offset}"))?;
                let temperature_c = rng.random_range(MIN_TEMPERATURE_C..=MAX_TEMPERATURE_C);
                let summary = SUMMARIES[rng.random_range(0..SUMMARIES.len())];
                Ok(WeatherForecast::new(
                    date,
                    temperature_c,
                    Some(summary.to_string()),
                ))
            })
            .collect()
    }
}

impl Default for RandomForecastGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceGenerator<Forecast> for RandomForecastGenerator {
    async fn generate(&self) -> anyhow::Result<Forecast> {
        self.build()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::*;
    use crate::clock::ManualClock;

    fn generator_at(year: i32, month: u32, day: u32) -> RandomForecastGenerator {
        let start = Utc.with_ymd_and_hms(year, month, day, 23, 59, 0).unwrap();
        RandomForecastGenerator::with_clock(Arc::new(ManualClock::new(start)))
    }

    #[tokio::test]
    async fn generates_five_consecutive_days_from_tomorrow() {
        let forecast = generator_at(2026, 10, 19).generate().await.unwrap();

        assert_eq!(forecast.len(), 5);
        let dates: Vec<NaiveDate> = forecast.iter().map(|f| f.date).collect();
        let expected: Vec<NaiveDate> = (20..=24)
            .map(|d| NaiveDate::from_ymd_opt(2026, 10, d).unwrap())
            .collect();
        assert_eq!(dates, expected);
    }

    #[tokio::test]
    async fn values_stay_within_generation_bounds() {
        let generator = generator_at(2026, 12, 30);
        for _ in 0..50 {
            for record in generator.generate().await.unwrap() {
                assert!((MIN_TEMPERATURE_C..=MAX_TEMPERATURE_C).contains(&record.temperature_c));
                let summary = record.summary.expect("generated records carry a summary");
                assert!(SUMMARIES.contains(&summary.as_str()));
            }
        }
    }

    #[tokio::test]
    async fn dates_roll_over_year_end() {
        let forecast = generator_at(2026, 12, 30).generate().await.unwrap();
        assert_eq!(forecast[0].date, NaiveDate::from_ymd_opt(2026, 12, 31).unwrap());
        assert_eq!(forecast[4].date, NaiveDate::from_ymd_opt(2027, 1, 4).unwrap());
    }
}
