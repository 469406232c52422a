//! Tower middleware layers for the forecast request stack.
//!
//! - [`timeout`]: Per-request deadline enforcement
//! - [`metrics`]: Request timing and outcome via `tracing` spans
//! - [`stack`]: Composes the layers around the forecast service

pub mod metrics;
pub mod stack;
pub mod timeout;

pub use metrics::MetricsLayer;
pub use stack::build_forecast_service;
pub use timeout::TimeoutLayer;
