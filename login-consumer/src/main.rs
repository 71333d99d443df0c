use std::future::ready;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{routing::get, Router};
use common_metrics::{serve, setup_metrics_routes};
use envconfig::Envconfig;
use health::HealthRegistry;
use tokio::sync::watch;
use tracing::level_filters::LevelFilter;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use login_consumer::config::Config;
use login_consumer::consumer::{ConsumerLoop, LoopSettings};
use login_consumer::kafka::{create_consumer, create_producer};
use login_consumer::metrics_consts::HISTOGRAM_BUCKETS;
use login_consumer::pipeline::Pipeline;
use login_consumer::schema::load_schema;
use login_consumer::sink::{Emitter, KafkaSink};
use login_consumer::source::KafkaSource;

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy()
            .add_directive("rdkafka=warn".parse().expect("valid log directive")),
    );
    tracing_subscriber::registry().with(log_layer).init();
}

pub async fn index() -> &'static str {
    "login consumer"
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
pub async fn main() -> Result<(), anyhow::Error> {
    setup_tracing();
    info!("Starting login consumer...");

    let config = Config::init_from_env().context("failed to load configuration")?;
    config.validate()?;
    info!(
        input_topic = config.consumer.kafka_consumer_topic,
        group_id = config.consumer.kafka_consumer_group,
        output_topic = config.output_topic,
        dlq_topic = config.dlq_topic,
        batch_size = config.batch_size,
        "Configuration loaded"
    );

    let schema = load_schema(&config.schema_source())
        .await
        .context("failed to load schema")?;

    let liveness = HealthRegistry::new("liveness");
    let loop_liveness = liveness.register("consumer_loop", Duration::from_secs(120));
    let producer_liveness = liveness.register("rdkafka_producer", Duration::from_secs(30));
    let consumer_liveness = liveness.register("rdkafka_consumer", Duration::from_secs(30));

    // Health and metrics server
    let registry = liveness.clone();
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(registry.get_status())));
    let router = setup_metrics_routes(router, HISTOGRAM_BUCKETS)?;
    let bind = config.bind();
    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start health server");
    });

    let producer = create_producer(&config.kafka, producer_liveness)?;
    let consumer = create_consumer(&config.kafka, &config.consumer, consumer_liveness)?;

    let emitter = Emitter::new(
        Arc::new(KafkaSink::new(producer)),
        config.retry_policy(),
        config.emit_timeout_ms.0,
    );
    let pipeline = Pipeline::new(Arc::new(schema), config.forward_undeclared_fields);
    let consumer_loop = ConsumerLoop::new(
        KafkaSource::new(consumer),
        pipeline,
        emitter,
        LoopSettings::from(&config),
        loop_liveness,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    consumer_loop.run(shutdown_rx).await?;

    info!("Login consumer shut down");
    Ok(())
}
