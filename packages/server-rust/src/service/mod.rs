//! Request-facing service stack.
//!
//! 1. **Service** (`forecast`): `ForecastRequest` -> `ForecastPipeline`
//! 2. **Middleware** (`middleware`): Tower layers (timeout, metrics)

pub mod forecast;
pub mod middleware;

pub use forecast::{ForecastRequest, ForecastService};
pub use middleware::build_forecast_service;
