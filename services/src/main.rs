//! Courier host process.
//!
//! Runs the consuming side of the user or order service: handles the other
//! service's creation events until interrupted.

use courier_core::broker::{Broker, BrokerError};
use courier_core::environment::SystemClock;
use courier_runtime::metrics::MetricsServer;
use courier_runtime::{BrokerConsumer, ConsumerExit, ResilientPublisher};
use courier_services::app::{self, Stores};
use courier_services::Config;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        role = %config.role,
        brokers = %config.kafka.bootstrap_servers,
        consumer_group = %config.kafka.consumer_group,
        consumes = %config.consumed_topic(),
        produces = %config.produced_topic(),
        "Configuration loaded"
    );

    let mut metrics = MetricsServer::new(config.metrics_addr);
    metrics.start()?;

    // Blocks until the broker answers a metadata request
    info!("Waiting for Kafka...");
    let kafka = config.kafka_builder();
    let publisher = ResilientPublisher::connect(
        || {
            let kafka = kafka.clone();
            async move {
                let broker = kafka.connect().await?;
                Ok::<_, BrokerError>(Arc::new(broker) as Arc<dyn Broker>)
            }
        },
        config.publisher_config(),
    )
    .await;

    let stores = Stores::in_memory();
    let registry = app::handler_registry(&config, &stores);
    let dispatcher = Arc::new(app::dispatcher(
        &config,
        registry,
        publisher.broker(),
        Arc::new(SystemClock),
    ));

    let (consumer, shutdown) =
        BrokerConsumer::new(publisher.broker(), dispatcher, config.consumer_config());
    let mut task = consumer.spawn();

    let finished = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown signal received, stopping consumer");
            if shutdown.send(true).is_err() {
                warn!("Consumer already stopped");
            }
            None
        }
        joined = &mut task => Some(joined??),
    };
    let exit = match finished {
        Some(exit) => exit,
        None => task.await??,
    };

    match exit {
        ConsumerExit::Cancelled => info!("Consumer stopped"),
        ConsumerExit::NoHandlers => warn!("No handlers registered, consumer never started"),
    }

    Ok(())
}
