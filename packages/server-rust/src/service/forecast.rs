//! Tower service that runs one forecast request through the pipeline.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futuretech_core::{Forecast, ResourceGenerator, TraceContext};
use tower::Service;

use crate::pipeline::{ForecastPipeline, PipelineError};

/// One inbound forecast request.
#[derive(Debug, Clone, Default)]
pub struct ForecastRequest {
    /// Caller-assigned identifier, used for log correlation only.
    pub call_id: u64,
    /// Trace context of the caller, if it is being traced.
    pub trace: Option<TraceContext>,
}

impl ForecastRequest {
    #[must_use]
    pub fn new(call_id: u64, trace: Option<TraceContext>) -> Self {
        Self { call_id, trace }
    }
}

/// Innermost service of the stack: delegates to [`ForecastPipeline`].
///
/// Cheap to clone; the pipeline and generator are shared.
#[derive(Clone)]
pub struct ForecastService {
    pipeline: Arc<ForecastPipeline>,
    generator: Arc<dyn ResourceGenerator<Forecast>>,
}

impl ForecastService {
    #[must_use]
    pub fn new(
        pipeline: Arc<ForecastPipeline>,
        generator: Arc<dyn ResourceGenerator<Forecast>>,
    ) -> Self {
        Self {
            pipeline,
            generator,
        }
    }
}

impl Service<ForecastRequest> for ForecastService {
    type Response = Forecast;
    type Error = PipelineError;
    type Future = Pin<Box<dyn Future<Output = Result<Forecast, PipelineError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ForecastRequest) -> Self::Future {
        let pipeline = Arc::clone(&self.pipeline);
        let generator = Arc::clone(&self.generator);
        Box::pin(async move {
            pipeline
                .weather_forecast(generator.as_ref(), req.trace.as_ref())
                .await
        })
    }
}
