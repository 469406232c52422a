//! Futuretech Core: forecast model, resource generators, trace context propagation,
//! and message envelopes. Pure types and functions; no network I/O.

pub mod clock;
pub mod envelope;
pub mod forecast;
pub mod generator;
pub mod propagation;
pub mod trace;

pub use clock::{ClockSource, ManualClock, SystemClock};
pub use envelope::{HeaderCarrier, HeaderValue, InjectionError, MessageEnvelope, MessageHeaders};
pub use forecast::{celsius_to_fahrenheit, Forecast, WeatherForecast};
pub use generator::{RandomForecastGenerator, ResourceGenerator};
pub use propagation::{
    decode_baggage, encode_baggage, tag_keys, ContextPropagator, MessagingTags, W3cPropagator,
    BAGGAGE_HEADER, MESSAGING_SYSTEM,
};
pub use trace::TraceContext;
