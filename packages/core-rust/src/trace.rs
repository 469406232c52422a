//! Distributed trace context threaded explicitly through the request path.
//!
//! A [`TraceContext`] is owned by the inbound request and handed to the
//! pipeline by reference. The pipeline never mutates it: the publish step
//! derives a [`child`](TraceContext::child) producer context and injects that.

use opentelemetry::trace::{
    SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState,
};
use opentelemetry::Context;
use opentelemetry_sdk::trace::{IdGenerator, RandomIdGenerator};

/// Trace identity plus baggage for one logical request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    trace_id: TraceId,
    span_id: SpanId,
    sampled: bool,
    baggage: Vec<(String, String)>,
}

impl TraceContext {
    #[must_use]
    pub fn new(trace_id: TraceId, span_id: SpanId, sampled: bool) -> Self {
        Self {
            trace_id,
            span_id,
            sampled,
            baggage: Vec::new(),
        }
    }

    /// Starts a new trace with random identifiers.
    #[must_use]
    pub fn new_root(sampled: bool) -> Self {
        let ids = RandomIdGenerator::default();
        Self::new(ids.new_trace_id(), ids.new_span_id(), sampled)
    }

    /// Parses hex-encoded identifiers (32 and 16 lowercase hex digits).
    ///
    /// # Errors
    ///
    /// Returns an error if either identifier is not valid hex or is all zeros.
    pub fn from_hex(trace_id: &str, span_id: &str, sampled: bool) -> anyhow::Result<Self> {
        let trace_id = TraceId::from_hex(trace_id)
            .map_err(|e| anyhow::anyhow!("invalid trace id {trace_id:?}: {e}"))?;
        let span_id = SpanId::from_hex(span_id)
            .map_err(|e| anyhow::anyhow!("invalid span id {span_id:?}: {e}"))?;
        if trace_id == TraceId::INVALID || span_id == SpanId::INVALID {
            anyhow::bail!("trace and span ids must be non-zero");
        }
        Ok(Self::new(trace_id, span_id, sampled))
    }

    /// Appends a baggage entry. Later entries with the same key win.
    #[must_use]
    pub fn with_baggage(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.baggage.retain(|(existing, _)| *existing != key);
        self.baggage.push((key, value.into()));
        self
    }

    /// Derives a child span in the same trace, inheriting sampling and baggage.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: RandomIdGenerator::default().new_span_id(),
            sampled: self.sampled,
            baggage: self.baggage.clone(),
        }
    }

    #[must_use]
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    #[must_use]
    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    #[must_use]
    pub fn is_sampled(&self) -> bool {
        self.sampled
    }

    #[must_use]
    pub fn baggage(&self) -> &[(String, String)] {
        &self.baggage
    }

    /// Looks up a baggage value by key.
    #[must_use]
    pub fn baggage_value(&self, key: &str) -> Option<&str> {
        self.baggage
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Builds a detached OpenTelemetry context carrying this trace as a remote parent.
    ///
    /// Only the span identity is carried. Baggage stays on the
    /// [`TraceContext`] so its order is preserved.
    #[must_use]
    pub fn to_otel_context(&self) -> Context {
        let flags = if self.sampled {
            TraceFlags::SAMPLED
        } else {
            TraceFlags::default()
        };
        let span_context = SpanContext::new(
            self.trace_id,
            self.span_id,
            flags,
            true,
            TraceState::default(),
        );
        Context::new().with_remote_span_context(span_context)
    }

    /// Reads the trace identity back out of an OpenTelemetry context.
    ///
    /// Returns `None` when the context holds no valid span context. The
    /// result carries no baggage.
    #[must_use]
    pub fn from_otel_context(cx: &Context) -> Option<Self> {
        let span = cx.span();
        let span_context = span.span_context();
        if !span_context.is_valid() {
            return None;
        }
        Some(Self::new(
            span_context.trace_id(),
            span_context.span_id(),
            span_context.is_sampled(),
        ))
    }
}
