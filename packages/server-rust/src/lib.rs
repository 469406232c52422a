//! Futuretech Server: cache-aside forecast pipeline that republishes every
//! served result to a durable queue, carrying the caller's trace context.

pub mod broker;
pub mod cache;
pub mod config;
pub mod pipeline;
pub mod publisher;
pub mod report;
pub mod service;
pub mod telemetry;

pub use broker::{BrokerChannel, BrokerConnection, BrokerError, InMemoryBroker};
pub use cache::{CacheError, CacheGateway, InMemoryCache};
pub use config::{PipelineConfig, ProducerArgs};
pub use pipeline::{ForecastPipeline, PipelineError};
pub use publisher::QueuePublisher;
pub use report::{FailureReporter, LogReporter, PipelineFailure};
pub use service::{build_forecast_service, ForecastRequest, ForecastService};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
