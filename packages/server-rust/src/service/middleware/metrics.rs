//! Metrics middleware for forecast requests.
//!
//! Records request duration and outcome on a `tracing` span; no metrics crate.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use futuretech_core::Forecast;
use tower::{Layer, Service};
use tracing::{field, info_span, Instrument};

use crate::pipeline::PipelineError;
use crate::service::forecast::ForecastRequest;

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments requests with timing and outcome via `tracing` spans.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records request duration and outcome in tracing spans.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<ForecastRequest> for MetricsService<S>
where
    S: Service<ForecastRequest, Response = Forecast, Error = PipelineError> + Send,
    S::Future: Send + 'static,
{
    type Response = Forecast;
    type Error = PipelineError;
    type Future = Pin<Box<dyn Future<Output = Result<Forecast, PipelineError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ForecastRequest) -> Self::Future {
        let call_id = req.call_id;
        let span = info_span!(
            "forecast request",
            call_id,
            trace_id = field::Empty,
            duration_ms = field::Empty,
            outcome = field::Empty,
        );
        if let Some(trace) = &req.trace {
            span.record("trace_id", field::display(trace.trace_id()));
        }

        let fut = self.inner.call(req);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(PipelineError::Timeout { .. }) => "timeout",
                    Err(_) => "error",
                };

                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                match &result {
                    Ok(forecast) => tracing::info!(
                        call_id,
                        duration_ms,
                        records = forecast.len(),
                        "forecast served"
                    ),
                    Err(err) => tracing::warn!(
                        call_id,
                        duration_ms,
                        outcome,
                        error = %err,
                        "forecast request failed"
                    ),
                }

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
