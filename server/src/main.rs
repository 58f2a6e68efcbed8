//! Taskflow Analytics HTTP server.

use taskflow_analytics::{Application, Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "taskflow_analytics=info,tower_http=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before the filter reads RUST_LOG
    let dotenv = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(error) = dotenv {
        info!(error = %error, "No .env file loaded, using process environment");
    }

    info!("Starting Taskflow Analytics service");

    let config = Config::from_env();
    info!(
        database = %config.store.database,
        transport = %config.transport,
        kafka_brokers = %config.kafka.brokers,
        kafka_topic = %config.kafka.topic,
        amqp_queue = %config.amqp.queue,
        address = %config.server.bind_address(),
        metrics_enabled = config.server.metrics_enabled,
        "Configuration loaded"
    );

    let app = Application::build(&config).await?;
    app.run().await
}
