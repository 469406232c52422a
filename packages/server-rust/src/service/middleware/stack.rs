//! Stack composition: wraps the forecast service with the middleware layers.

use futuretech_core::Forecast;
use tower::ServiceBuilder;

use super::metrics::MetricsLayer;
use super::timeout::TimeoutLayer;
use crate::config::PipelineConfig;
use crate::pipeline::PipelineError;
use crate::service::forecast::{ForecastRequest, ForecastService};

/// Build the request stack around a [`ForecastService`].
///
/// Layer order (outermost to innermost):
/// 1. `TimeoutLayer` -- enforce `config.request_timeout`
/// 2. `MetricsLayer` -- record timing and outcome (closest to the pipeline)
///
/// A timed-out request is therefore never seen by the metrics span.
#[must_use]
pub fn build_forecast_service(
    service: ForecastService,
    config: &PipelineConfig,
) -> impl tower::Service<ForecastRequest, Response = Forecast, Error = PipelineError> + Clone {
    ServiceBuilder::new()
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(MetricsLayer)
        .service(service)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
