//! Cache-aside read with an unconditional republish to a durable queue.
//!
//! One [`ForecastPipeline::execute`] call walks a fixed sequence:
//!
//! 1. **Check**: read the key from the cache. A read error or a corrupt entry
//!    counts as a miss.
//! 2. **Hit**: decode the cached bytes.
//! 3. **Miss**: run the generator (fatal on error), encode, and write back with
//!    an absolute deadline of `now + ttl`. A failed write is not fatal.
//! 4. **Ready**: build a persistent JSON envelope, inject a producer child of
//!    the caller's trace context, and publish it. Neither step is fatal.
//! 5. **Respond**: return the resource.
//!
//! Only a generator failure (or an encode failure) reaches the caller. Every
//! absorbed failure is handed to the configured [`FailureReporter`].
//!
//! Concurrent misses on the same key are not coalesced: each request generates
//! and the last cache write wins.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futuretech_core::{
    ClockSource, ContextPropagator, Forecast, MessageEnvelope, MessagingTags, ResourceGenerator,
    SystemClock, TraceContext, W3cPropagator, MESSAGING_SYSTEM,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, field, info_span, Instrument};

use crate::broker::BrokerConnection;
use crate::cache::{CacheError, CacheGateway};
use crate::config::PipelineConfig;
use crate::publisher::QueuePublisher;
use crate::report::{FailureReporter, LogReporter, PipelineFailure};

/// Errors surfaced to the caller. Everything else is reported and absorbed.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("resource generation failed: {0}")]
    Generator(#[source] anyhow::Error),
    #[error("resource encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

// ---------------------------------------------------------------------------
// ForecastPipeline
// ---------------------------------------------------------------------------

/// Orchestrates cache, generator, propagator and publisher for one request.
///
/// Holds no per-request state; share it behind an `Arc`.
pub struct ForecastPipeline {
    cache: Arc<dyn CacheGateway>,
    publisher: QueuePublisher,
    propagator: Arc<dyn ContextPropagator>,
    reporter: Arc<dyn FailureReporter>,
    clock: Arc<dyn ClockSource>,
    config: PipelineConfig,
}

impl ForecastPipeline {
    /// Creates a pipeline with the W3C propagator, the logging reporter and
    /// the system clock.
    #[must_use]
    pub fn new(
        cache: Arc<dyn CacheGateway>,
        connection: Arc<dyn BrokerConnection>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            cache,
            publisher: QueuePublisher::new(connection, config.publish_timeout),
            propagator: Arc::new(W3cPropagator::new()),
            reporter: Arc::new(LogReporter),
            clock: Arc::new(SystemClock),
            config,
        }
    }

    #[must_use]
    pub fn with_propagator(mut self, propagator: Arc<dyn ContextPropagator>) -> Self {
        self.propagator = propagator;
        self
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn FailureReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Clock used for cache deadlines and envelope timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Serves the weather forecast under the configured cache key.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn weather_forecast<G>(
        &self,
        generator: &G,
        trace: Option<&TraceContext>,
    ) -> Result<Forecast, PipelineError>
    where
        G: ResourceGenerator<Forecast> + ?Sized,
    {
        self.execute(&self.config.cache_key, generator, trace).await
    }

    /// Serves the resource under `key`, generating it on a miss, then
    /// republishes it to the configured queue.
    ///
    /// `trace` is the caller's context; when present, a producer child of it
    /// is injected into the published message.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Generator`] if the cache could not supply the
    /// resource and the generator failed, or [`PipelineError::Encode`] if the
    /// resource cannot be serialized.
    pub async fn execute<T, G>(
        &self,
        key: &str,
        generator: &G,
        trace: Option<&TraceContext>,
    ) -> Result<T, PipelineError>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        G: ResourceGenerator<T> + ?Sized,
    {
        let (resource, body) = match self.check::<T>(key).await {
            Some(resource) => {
                debug!(key, "cache hit");
                let body = Bytes::from(serde_json::to_vec(&resource)?);
                (resource, body)
            }
            None => {
                debug!(key, "cache miss; generating");
                let resource = generator.generate().await.map_err(PipelineError::Generator)?;
                let body = Bytes::from(serde_json::to_vec(&resource)?);
                self.store(key, body.clone()).await;
                (resource, body)
            }
        };

        self.publish(body, trace).await;
        Ok(resource)
    }

    // ----- Steps -----

    async fn check<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let cached = match self.bounded(self.cache.get(key)).await {
            Ok(cached) => cached?,
            Err(source) => {
                self.reporter.report(&PipelineFailure::CacheRead {
                    key: key.to_string(),
                    source,
                });
                return None;
            }
        };

        match serde_json::from_slice(&cached) {
            Ok(resource) => Some(resource),
            Err(err) => {
                self.reporter.report(&PipelineFailure::CorruptEntry {
                    key: key.to_string(),
                    reason: err.to_string(),
                });
                None
            }
        }
    }

    async fn store(&self, key: &str, body: Bytes) {
        let result = match self.deadline() {
            Ok(expires_at) => self.bounded(self.cache.set(key, body, expires_at)).await,
            Err(err) => Err(err),
        };
        if let Err(source) = result {
            self.reporter.report(&PipelineFailure::CacheWrite {
                key: key.to_string(),
                source,
            });
        }
    }

    async fn publish(&self, body: Bytes, trace: Option<&TraceContext>) {
        let queue = self.config.queue_name.as_str();
        let mut envelope = MessageEnvelope::persistent_json(body, self.clock.now());

        let span = info_span!(
            "queue publish",
            otel.kind = "producer",
            messaging.system = MESSAGING_SYSTEM,
            messaging.destination = queue,
            trace_id = field::Empty,
        );

        if let Some(trace) = trace {
            let producer = trace.child();
            span.record("trace_id", field::display(producer.trace_id()));
            let tags = MessagingTags::for_queue(queue);
            if let Err(err) = self
                .propagator
                .inject(&producer, &tags, &mut envelope.headers)
            {
                self.reporter.report(&PipelineFailure::Injection(err));
            }
        }

        if let Err(source) = self
            .publisher
            .publish(queue, &envelope)
            .instrument(span)
            .await
        {
            self.reporter.report(&PipelineFailure::Publish {
                queue: queue.to_string(),
                source,
            });
        }
    }

    // ----- Helpers -----

    fn deadline(&self) -> Result<chrono::DateTime<chrono::Utc>, CacheError> {
        let ttl = chrono::Duration::from_std(self.config.cache_ttl).map_err(CacheError::unavailable)?;
        self.clock
            .now()
            .checked_add_signed(ttl)
            .ok_or_else(|| CacheError::Unavailable {
                reason: "cache deadline out of range".to_string(),
            })
    }

    async fn bounded<F, V>(&self, call: F) -> Result<V, CacheError>
    where
        F: Future<Output = Result<V, CacheError>>,
    {
        let limit: Duration = self.config.cache_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_elapsed) => Err(CacheError::Timeout {
                timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use futuretech_core::{
        tag_keys, HeaderCarrier, InjectionError, ManualClock, RandomForecastGenerator,
    };

    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::cache::InMemoryCache;
    use crate::report::testing::RecordingReporter;

    const TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
    const SPAN_ID: &str = "00f067aa0ba902b7";

    /// Delegates to the random generator, counting calls. Yields once first so
    /// concurrent requests interleave.
    struct CountingGenerator {
        inner: RandomForecastGenerator,
        calls: AtomicUsize,
    }

    impl CountingGenerator {
        fn new(clock: Arc<dyn ClockSource>) -> Self {
            Self {
                inner: RandomForecastGenerator::with_clock(clock),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ResourceGenerator<Forecast> for CountingGenerator {
        async fn generate(&self) -> anyhow::Result<Forecast> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.inner.generate().await
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl ResourceGenerator<Forecast> for FailingGenerator {
        async fn generate(&self) -> anyhow::Result<Forecast> {
            anyhow::bail!("upstream offline")
        }
    }

    /// Refuses every header.
    struct RejectingPropagator;

    impl ContextPropagator for RejectingPropagator {
        fn inject(
            &self,
            _ctx: &TraceContext,
            _tags: &MessagingTags,
            _carrier: &mut dyn HeaderCarrier,
        ) -> Result<(), InjectionError> {
            Err(InjectionError::Rejected {
                key: "traceparent".to_string(),
                reason: "unsupported value type".to_string(),
            })
        }
    }

    /// Cache whose calls never complete.
    struct HangingCache;

    #[async_trait]
    impl CacheGateway for HangingCache {
        async fn get(&self, _key: &str) -> Result<Option<Bytes>, CacheError> {
            std::future::pending().await
        }

        async fn set(
            &self,
            _key: &str,
            _value: Bytes,
            _expires_at: chrono::DateTime<Utc>,
        ) -> Result<(), CacheError> {
            std::future::pending().await
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        cache: Arc<InMemoryCache>,
        broker: InMemoryBroker,
        reporter: Arc<RecordingReporter>,
        generator: CountingGenerator,
        pipeline: ForecastPipeline,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap(),
        ));
        let cache = Arc::new(InMemoryCache::with_clock(clock.clone()));
        let broker = InMemoryBroker::new();
        let reporter = Arc::new(RecordingReporter::default());
        let pipeline = ForecastPipeline::new(
            cache.clone(),
            Arc::new(broker.clone()),
            PipelineConfig::default(),
        )
        .with_reporter(reporter.clone())
        .with_clock(clock.clone());
        Fixture {
            generator: CountingGenerator::new(clock.clone()),
            clock,
            cache,
            broker,
            reporter,
            pipeline,
        }
    }

    fn trace() -> TraceContext {
        TraceContext::from_hex(TRACE_ID, SPAN_ID, true)
            .unwrap()
            .with_baggage("tenant", "acme")
    }

    // ----- End to end -----

    #[tokio::test]
    async fn miss_then_hit_generates_once_and_publishes_twice() {
        let f = fixture();
        let start = f.clock.now();

        let first = f
            .pipeline
            .weather_forecast(&f.generator, Some(&trace()))
            .await
            .unwrap();
        assert_eq!(first.len(), 5);
        assert_eq!(f.generator.calls(), 1);
        assert_eq!(
            f.cache.expires_at("forecast"),
            Some(start + chrono::Duration::seconds(15))
        );

        let messages = f.broker.messages("queue");
        assert_eq!(messages.len(), 1);
        assert!(messages[0].persistent);
        assert_eq!(
            messages[0].headers.get_str(tag_keys::SYSTEM),
            Some("rabbitmq")
        );

        f.clock.advance(chrono::Duration::seconds(10));
        let second = f
            .pipeline
            .weather_forecast(&f.generator, Some(&trace()))
            .await
            .unwrap();

        assert_eq!(f.generator.calls(), 1);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
        let messages = f.broker.messages("queue");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].body, messages[1].body);
        assert!(f.reporter.kinds().is_empty());
        assert_eq!(f.broker.open_channels(), 0);
    }

    #[tokio::test]
    async fn published_body_is_the_cached_wire_form() {
        let f = fixture();
        let forecast = f
            .pipeline
            .weather_forecast(&f.generator, None)
            .await
            .unwrap();

        let cached = f.cache.get("forecast").await.unwrap().unwrap();
        let published = &f.broker.messages("queue")[0];
        assert_eq!(published.body, cached);

        let records: Vec<serde_json::Value> = serde_json::from_slice(&cached).unwrap();
        assert_eq!(records.len(), 5);
        assert_eq!(
            records[0]["TemperatureC"],
            serde_json::json!(forecast[0].temperature_c)
        );
        assert!(records[0].get("TemperatureF").is_some());
    }

    // ----- Expiration -----

    #[tokio::test]
    async fn entry_at_deadline_is_a_miss() {
        let f = fixture();
        f.pipeline.weather_forecast(&f.generator, None).await.unwrap();

        f.clock
            .advance(chrono::Duration::seconds(15) - chrono::Duration::milliseconds(1));
        f.pipeline.weather_forecast(&f.generator, None).await.unwrap();
        assert_eq!(f.generator.calls(), 1);

        f.clock.advance(chrono::Duration::milliseconds(1));
        f.pipeline.weather_forecast(&f.generator, None).await.unwrap();
        assert_eq!(f.generator.calls(), 2);
    }

    // ----- Absorbed failures -----

    #[tokio::test]
    async fn broker_outage_still_returns_resource() {
        let f = fixture();
        f.broker.set_available(false);

        let forecast = f
            .pipeline
            .weather_forecast(&f.generator, Some(&trace()))
            .await
            .unwrap();

        assert_eq!(forecast.len(), 5);
        assert_eq!(f.reporter.kinds(), vec!["publish"]);
        assert!(f.broker.messages("queue").is_empty());
    }

    #[tokio::test]
    async fn cache_outage_falls_through_to_generation() {
        let f = fixture();
        f.cache.set_available(false);

        let forecast = f
            .pipeline
            .weather_forecast(&f.generator, None)
            .await
            .unwrap();

        assert_eq!(forecast.len(), 5);
        assert_eq!(f.generator.calls(), 1);
        assert_eq!(f.reporter.kinds(), vec!["cache_read", "cache_write"]);
        assert_eq!(f.broker.messages("queue").len(), 1);
    }

    #[tokio::test]
    async fn corrupt_entry_is_regenerated_and_overwritten() {
        let f = fixture();
        let expires_at = f.clock.now() + chrono::Duration::seconds(15);
        f.cache
            .set("forecast", Bytes::from_static(b"{not json"), expires_at)
            .await
            .unwrap();

        f.pipeline.weather_forecast(&f.generator, None).await.unwrap();

        assert_eq!(f.generator.calls(), 1);
        assert_eq!(f.reporter.kinds(), vec!["corrupt_entry"]);
        let cached = f.cache.get("forecast").await.unwrap().unwrap();
        assert!(serde_json::from_slice::<Forecast>(&cached).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_cache_times_out_and_counts_as_miss() {
        let broker = InMemoryBroker::new();
        let reporter = Arc::new(RecordingReporter::default());
        let pipeline = ForecastPipeline::new(
            Arc::new(HangingCache),
            Arc::new(broker.clone()),
            PipelineConfig::default(),
        )
        .with_reporter(reporter.clone());

        let forecast = pipeline
            .weather_forecast(&RandomForecastGenerator::new(), None)
            .await
            .unwrap();

        assert_eq!(forecast.len(), 5);
        assert_eq!(reporter.kinds(), vec!["cache_read", "cache_write"]);
        assert!(reporter.messages()[0].contains("timed out after 2000ms"));
        assert_eq!(broker.messages("queue").len(), 1);
    }

    // ----- Trace propagation -----

    #[tokio::test]
    async fn trace_headers_carry_caller_trace_with_new_span() {
        let f = fixture();
        f.pipeline
            .weather_forecast(&f.generator, Some(&trace()))
            .await
            .unwrap();

        let message = &f.broker.messages("queue")[0];
        let traceparent = message.headers.get_str("traceparent").unwrap();
        assert!(traceparent.starts_with(&format!("00-{TRACE_ID}-")));
        assert!(traceparent.ends_with("-01"));
        assert!(!traceparent.contains(SPAN_ID));
        assert_eq!(message.headers.get_str("baggage"), Some("tenant=acme"));
        assert_eq!(
            message.headers.get_str(tag_keys::DESTINATION_KIND),
            Some("queue")
        );
        assert_eq!(message.headers.get_str(tag_keys::DESTINATION), Some(""));
        assert_eq!(
            message.headers.get_str(tag_keys::ROUTING_KEY),
            Some("queue")
        );

        let extracted = W3cPropagator::new().extract(&message.headers).unwrap();
        assert_eq!(extracted.trace_id(), trace().trace_id());
        assert_ne!(extracted.span_id(), trace().span_id());
    }

    #[tokio::test]
    async fn injection_failure_publishes_without_headers() {
        let f = fixture();
        let pipeline = ForecastPipeline::new(
            f.cache.clone(),
            Arc::new(f.broker.clone()),
            PipelineConfig::default(),
        )
        .with_propagator(Arc::new(RejectingPropagator))
        .with_reporter(f.reporter.clone());

        pipeline
            .weather_forecast(&f.generator, Some(&trace()))
            .await
            .unwrap();

        let messages = f.broker.messages("queue");
        assert_eq!(messages.len(), 1);
        assert!(messages[0].headers.is_absent());
        assert_eq!(f.reporter.kinds(), vec!["injection"]);
    }

    #[tokio::test]
    async fn no_trace_context_publishes_without_headers() {
        let f = fixture();
        f.pipeline.weather_forecast(&f.generator, None).await.unwrap();

        let messages = f.broker.messages("queue");
        assert!(messages[0].headers.is_absent());
        assert!(f.reporter.kinds().is_empty());
    }

    // ----- Fatal path -----

    #[tokio::test]
    async fn generator_failure_is_surfaced_and_nothing_is_published() {
        let f = fixture();
        let err = f
            .pipeline
            .weather_forecast(&FailingGenerator, Some(&trace()))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Generator(_)));
        assert!(err.to_string().contains("upstream offline"));
        assert!(f.cache.is_empty());
        assert!(f.broker.messages("queue").is_empty());
    }

    #[tokio::test]
    async fn cached_resource_survives_generator_outage() {
        let f = fixture();
        f.pipeline.weather_forecast(&f.generator, None).await.unwrap();

        let forecast = f
            .pipeline
            .weather_forecast(&FailingGenerator, None)
            .await
            .unwrap();
        assert_eq!(forecast.len(), 5);
    }

    // ----- Concurrency -----

    #[tokio::test]
    async fn concurrent_misses_each_generate() {
        let f = fixture();
        let (a, b) = tokio::join!(
            f.pipeline.weather_forecast(&f.generator, None),
            f.pipeline.weather_forecast(&f.generator, None),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(f.generator.calls(), 2);
        assert_eq!(f.broker.messages("queue").len(), 2);
        assert_eq!(f.broker.open_channels(), 0);
    }

    #[tokio::test]
    async fn execute_serves_arbitrary_keys() {
        let f = fixture();
        let forecast: Forecast = f
            .pipeline
            .execute("forecast:eu", &f.generator, None)
            .await
            .unwrap();
        assert_eq!(forecast.len(), 5);
        assert!(f.cache.expires_at("forecast:eu").is_some());
        assert!(f.cache.expires_at("forecast").is_none());
    }
}
