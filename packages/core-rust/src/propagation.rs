//! Trace context propagation into message headers.
//!
//! [`W3cPropagator`] writes the W3C `traceparent`/`tracestate` headers through
//! OpenTelemetry's trace-context propagator and the W3C `baggage` header in
//! the context's own entry order, then adds the messaging tags that describe
//! the destination. Injection is all-or-nothing: if the carrier refuses any
//! header, the carrier is restored to what it held before the call.

use std::collections::HashMap;

use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tracing::debug;

use crate::envelope::{HeaderCarrier, HeaderValue, InjectionError, MessageHeaders};
use crate::trace::TraceContext;

/// W3C baggage header key.
pub const BAGGAGE_HEADER: &str = "baggage";

const TRACEPARENT_HEADER: &str = "traceparent";

/// Header keys for the messaging tags.
pub mod tag_keys {
    pub const SYSTEM: &str = "messaging.system";
    pub const DESTINATION_KIND: &str = "messaging.destination_kind";
    pub const DESTINATION: &str = "messaging.destination";
    pub const ROUTING_KEY: &str = "messaging.rabbitmq.routing_key";
}

/// Messaging system name advertised in [`tag_keys::SYSTEM`].
pub const MESSAGING_SYSTEM: &str = "rabbitmq";

/// Descriptive tags for the destination a message is published to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagingTags {
    pub system: String,
    pub destination_kind: String,
    /// Exchange name. Empty for the default exchange.
    pub destination: String,
    pub routing_key: String,
}

impl MessagingTags {
    /// Tags for a direct-to-queue publish through the default exchange.
    #[must_use]
    pub fn for_queue(queue: &str) -> Self {
        Self {
            system: MESSAGING_SYSTEM.to_string(),
            destination_kind: "queue".to_string(),
            destination: String::new(),
            routing_key: queue.to_string(),
        }
    }

    fn entries(&self) -> [(&'static str, &str); 4] {
        [
            (tag_keys::SYSTEM, self.system.as_str()),
            (tag_keys::DESTINATION_KIND, self.destination_kind.as_str()),
            (tag_keys::DESTINATION, self.destination.as_str()),
            (tag_keys::ROUTING_KEY, self.routing_key.as_str()),
        ]
    }
}

/// Writes a trace context and messaging tags into a header carrier.
///
/// Pure: no I/O, and the trace context is only read.
pub trait ContextPropagator: Send + Sync {
    /// # Errors
    ///
    /// Returns the carrier's refusal. The carrier holds none of the
    /// propagation headers when an error is returned.
    fn inject(
        &self,
        ctx: &TraceContext,
        tags: &MessagingTags,
        carrier: &mut dyn HeaderCarrier,
    ) -> Result<(), InjectionError>;
}

/// W3C trace context + W3C baggage propagator.
pub struct W3cPropagator {
    trace_context: TraceContextPropagator,
}

impl W3cPropagator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            trace_context: TraceContextPropagator::new(),
        }
    }

    /// Rebuilds the trace context carried by `headers`, if any.
    #[must_use]
    pub fn extract(&self, headers: &MessageHeaders) -> Option<TraceContext> {
        let cx = self.trace_context.extract(&HeaderExtractor(headers));
        let ctx = TraceContext::from_otel_context(&cx)?;
        Some(apply_baggage(ctx, headers.get_str(BAGGAGE_HEADER)))
    }

    /// Rebuilds a trace context from raw `traceparent` and optional `baggage` values.
    #[must_use]
    pub fn extract_from_values(
        &self,
        traceparent: &str,
        baggage: Option<&str>,
    ) -> Option<TraceContext> {
        let mut map = HashMap::new();
        map.insert(TRACEPARENT_HEADER.to_string(), traceparent.to_string());
        let cx = self.trace_context.extract(&map);
        let ctx = TraceContext::from_otel_context(&cx)?;
        Some(apply_baggage(ctx, baggage))
    }
}

impl Default for W3cPropagator {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextPropagator for W3cPropagator {
    fn inject(
        &self,
        ctx: &TraceContext,
        tags: &MessagingTags,
        carrier: &mut dyn HeaderCarrier,
    ) -> Result<(), InjectionError> {
        let mut staged = StagedHeaders::default();
        self.trace_context
            .inject_context(&ctx.to_otel_context(), &mut staged);
        if let Some(baggage) = encode_baggage(ctx.baggage()) {
            staged.set(BAGGAGE_HEADER, baggage);
        }
        for (key, value) in tags.entries() {
            staged.set(key, value.to_string());
        }

        // Each written key with the value it replaced, for rollback.
        let mut written: Vec<(String, Option<HeaderValue>)> = Vec::with_capacity(staged.0.len());
        for (key, value) in staged.0 {
            match carrier.try_set(&key, HeaderValue::Str(value)) {
                Ok(previous) => written.push((key, previous)),
                Err(err) => {
                    rollback(carrier, written);
                    return Err(err);
                }
            }
        }
        Ok(())
    }
}

/// Undoes writes in reverse order, restoring replaced values.
fn rollback(carrier: &mut dyn HeaderCarrier, written: Vec<(String, Option<HeaderValue>)>) {
    for (key, previous) in written.into_iter().rev() {
        match previous {
            Some(value) => {
                if let Err(err) = carrier.try_set(&key, value) {
                    debug!(key = %key, error = %err, "could not restore header during rollback");
                }
            }
            None => {
                carrier.remove(&key);
            }
        }
    }
}

// ----- Baggage codec -----

/// Encodes entries as a W3C `baggage` value, in order: comma-separated
/// `key=value` members with both sides percent-encoded. `None` when empty.
#[must_use]
pub fn encode_baggage(entries: &[(String, String)]) -> Option<String> {
    if entries.is_empty() {
        return None;
    }
    let members: Vec<String> = entries
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                urlencoding::encode(key),
                urlencoding::encode(value)
            )
        })
        .collect();
    Some(members.join(","))
}

/// Parses a W3C `baggage` value into entries, in header order.
///
/// Member properties (`;...`) are dropped. Members without `=`, with an empty
/// key, or with invalid percent-encoding are skipped.
#[must_use]
pub fn decode_baggage(header: &str) -> Vec<(String, String)> {
    header
        .split(',')
        .filter_map(|member| {
            let pair = member.split(';').next()?;
            let (key, value) = pair.split_once('=')?;
            let key = urlencoding::decode(key.trim()).ok()?;
            let value = urlencoding::decode(value.trim()).ok()?;
            if key.is_empty() {
                return None;
            }
            Some((key.into_owned(), value.into_owned()))
        })
        .collect()
}

fn apply_baggage(ctx: TraceContext, header: Option<&str>) -> TraceContext {
    header
        .map(decode_baggage)
        .unwrap_or_default()
        .into_iter()
        .fold(ctx, |ctx, (key, value)| ctx.with_baggage(key, value))
}

/// Collects propagator output before it touches the real carrier.
#[derive(Default)]
struct StagedHeaders(Vec<(String, String)>);

impl Injector for StagedHeaders {
    fn set(&mut self, key: &str, value: String) {
        self.0.retain(|(k, _)| k != key);
        self.0.push((key.to_string(), value));
    }
}

struct HeaderExtractor<'a>(&'a MessageHeaders);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get_str(key)
    }

    fn keys(&self) -> Vec<&str> {
        self.0.iter().map(|(k, _)| k).collect()
    }
}
