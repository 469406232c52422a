//! One-shot forecast producer: serves the forecast once through the full
//! request stack against Redis and RabbitMQ, then prints it as JSON.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use futuretech_core::RandomForecastGenerator;
use futuretech_server::broker::AmqpConnection;
use futuretech_server::cache::RedisCache;
use futuretech_server::telemetry::init_tracing;
use futuretech_server::{
    build_forecast_service, ForecastPipeline, ForecastRequest, ForecastService, ProducerArgs,
};
use tower::ServiceExt;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ProducerArgs::parse();
    init_tracing(args.log_format)?;
    let config = args.pipeline_config();

    let cache = RedisCache::connect(&args.redis_url)
        .await
        .context("failed to connect to redis")?;
    let connection = Arc::new(
        AmqpConnection::connect(&args.amqp_url, &args.connection_name)
            .await
            .context("failed to connect to amqp broker")?,
    );

    let trace = args.incoming_trace()?;
    info!(trace_id = %trace.trace_id(), "serving forecast");

    let pipeline = ForecastPipeline::new(Arc::new(cache), connection.clone(), config.clone());
    let service = build_forecast_service(
        ForecastService::new(Arc::new(pipeline), Arc::new(RandomForecastGenerator::new())),
        &config,
    );

    let result = service.oneshot(ForecastRequest::new(1, Some(trace))).await;

    if let Err(err) = connection.close().await {
        warn!(error = %err, "broker connection close failed");
    }

    let forecast = result.context("forecast request failed")?;
    println!("{}", serde_json::to_string_pretty(&forecast)?);
    Ok(())
}
