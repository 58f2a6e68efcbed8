//! Application lifecycle management and graceful shutdown.
//!
//! [`Application`] owns everything the service runs:
//!
//! 1. **Startup**: bind the HTTP listener, wire cache, resolver and transport connector
//! 2. **Runtime**: serve HTTP while the connector keeps the cache fresh in the background
//! 3. **Shutdown**: on Ctrl+C or SIGTERM, stop accepting requests, cancel the connector
//!    and wait (bounded) for it to close its session
//!
//! Only a failure to bind the listener is fatal. A record store or broker that is down at
//! startup is tolerated: the pool connects lazily and the connector retries with backoff.
//! A record store, transport or metrics setting that cannot even be turned into a client
//! is logged and replaced by a degraded stand-in from [`crate::fallback`].

use crate::config::{AmqpConfig, Config, KafkaConfig, TransportKind};
use crate::fallback::{UnconfiguredRecordStore, UnconfiguredTransport};
use anyhow::Context;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use taskflow_analytics_core::{
    AggregateResolver, AnalyticsCache, RecordStore, Transport, TransportError,
};
use taskflow_analytics_postgres::PostgresRecordStore;
use taskflow_analytics_rabbitmq::AmqpTransport;
use taskflow_analytics_redpanda::KafkaTransport;
use taskflow_analytics_runtime::{PrometheusMetrics, TransportConnector};
use taskflow_analytics_web::{AppState, router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Running application with its background connector.
pub struct Application {
    /// TCP listener for the HTTP server
    listener: TcpListener,

    /// Axum router with all HTTP routes
    router: axum::Router,

    /// Transport connector, spawned by [`Application::run`]
    connector: TransportConnector,

    /// Cache shared by the resolver and the connector
    cache: Arc<AnalyticsCache>,

    /// Cancels the connector; also stops the HTTP server when cancelled externally
    shutdown: CancellationToken,

    /// Bound on waiting for the connector to terminate
    shutdown_timeout: Duration,
}

impl Application {
    /// Build the production application from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error only if the listener cannot be bound.
    pub async fn build(config: &Config) -> anyhow::Result<Self> {
        let metrics = install_metrics(config.server.metrics_enabled);
        let store = record_store(config);
        let transport = event_transport(config);

        let address = config.server.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .with_context(|| format!("Failed to bind HTTP listener on {address}"))?;

        Ok(Self::assemble(listener, transport, store, metrics, config))
    }

    /// Wire an application around an already bound listener and explicit collaborators.
    #[must_use]
    pub fn assemble(
        listener: TcpListener,
        transport: Arc<dyn Transport>,
        store: Arc<dyn RecordStore>,
        metrics: PrometheusMetrics,
        config: &Config,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let cache = Arc::new(AnalyticsCache::new());

        let resolver =
            AggregateResolver::new(Arc::clone(&cache), store).with_timeout(config.store.timeout());
        let connector = TransportConnector::new(transport, Arc::clone(&cache), shutdown.clone())
            .with_backoff(config.backoff.policy());

        let state = AppState::new(resolver, connector.state(), metrics);

        Self {
            listener,
            router: router(state),
            connector,
            cache,
            shutdown,
            shutdown_timeout: config.server.shutdown_timeout(),
        }
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns the socket error if the address cannot be read.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Token that stops the application when cancelled.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The shared aggregate cache.
    #[must_use]
    pub fn cache(&self) -> Arc<AnalyticsCache> {
        Arc::clone(&self.cache)
    }

    /// Run until Ctrl+C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP server fails.
    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `signal` completes or the shutdown token is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP server fails.
    pub async fn run_until(
        self,
        signal: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let address = self.listener.local_addr()?;
        let connector = self.connector.spawn();

        let shutdown = self.shutdown.clone();
        info!(address = %address, "HTTP server listening for requests");
        let served = axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    () = signal => {}
                    () = shutdown.cancelled() => {}
                }
            })
            .await;

        info!("HTTP server stopped, initiating graceful shutdown...");
        self.shutdown.cancel();

        match tokio::time::timeout(self.shutdown_timeout, connector).await {
            Ok(Ok(stats)) => info!(
                received = stats.received,
                invalidated = stats.invalidated,
                hard_failures = stats.hard_failures,
                soft_failures = stats.soft_failures,
                ack_failures = stats.ack_failures,
                "Transport connector stopped gracefully"
            ),
            Ok(Err(e)) => warn!(error = %e, "Transport connector task failed"),
            Err(_) => warn!(
                timeout_secs = self.shutdown_timeout.as_secs(),
                "Transport connector shutdown timed out"
            ),
        }

        served.context("HTTP server failed")?;
        info!("Graceful shutdown complete");
        Ok(())
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("listener", &self.listener.local_addr().ok())
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

/// Install the Prometheus recorder, or run without `/metrics` if that fails.
fn install_metrics(enabled: bool) -> PrometheusMetrics {
    if !enabled {
        return PrometheusMetrics::disabled();
    }
    PrometheusMetrics::install().unwrap_or_else(|e| {
        error!(error = %e, "Failed to install metrics recorder, serving without metrics");
        PrometheusMetrics::disabled()
    })
}

/// The Postgres record store, or a store that reports itself unavailable.
fn record_store(config: &Config) -> Arc<dyn RecordStore> {
    match PostgresRecordStore::connect_lazy(
        &config.store.url,
        Some(&config.store.database),
        config.store.max_connections,
    ) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "Failed to configure record store, analytics reads will fail");
            Arc::new(UnconfiguredRecordStore::new(e.to_string()))
        }
    }
}

/// The configured change-event transport, or one that never connects.
fn event_transport(config: &Config) -> Arc<dyn Transport> {
    let built: Result<Arc<dyn Transport>, TransportError> = match config.transport {
        TransportKind::Kafka => {
            kafka_transport(&config.kafka).map(|t| Arc::new(t) as Arc<dyn Transport>)
        }
        TransportKind::Amqp => {
            amqp_transport(&config.amqp).map(|t| Arc::new(t) as Arc<dyn Transport>)
        }
    };

    built.unwrap_or_else(|e| {
        error!(
            transport = %config.transport,
            error = %e,
            "Failed to configure event transport, cache invalidation is disabled"
        );
        Arc::new(UnconfiguredTransport::new(e.to_string()))
    })
}

/// Build the Kafka transport from configuration.
///
/// # Errors
///
/// Returns [`TransportError::DialFailed`] if brokers or topic are empty.
pub fn kafka_transport(config: &KafkaConfig) -> Result<KafkaTransport, TransportError> {
    KafkaTransport::builder()
        .brokers(&config.brokers)
        .topic(&config.topic)
        .consumer_group(&config.consumer_group)
        .auto_offset_reset(&config.auto_offset_reset)
        .session_timeout(Duration::from_millis(config.session_timeout_ms))
        .heartbeat_interval(Duration::from_millis(config.heartbeat_interval_ms))
        .dial_timeout(Duration::from_millis(config.dial_timeout_ms))
        .build()
}

/// Build the RabbitMQ transport from configuration.
///
/// # Errors
///
/// Returns [`TransportError::DialFailed`] if the URL is empty or malformed, or the queue
/// is empty.
pub fn amqp_transport(config: &AmqpConfig) -> Result<AmqpTransport, TransportError> {
    AmqpTransport::builder()
        .url(&config.url)
        .queue(&config.queue)
        .prefetch(config.prefetch)
        .dial_timeout(Duration::from_millis(config.dial_timeout_ms))
        .build()
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// A handler that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            warn!(error = %error, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                warn!(error = %error, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use taskflow_analytics_testing::{InMemoryRecordStore, InMemoryTransport};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn test_config() -> Config {
        let vars: HashMap<&str, &str> = [
            ("HOST", "127.0.0.1"),
            ("PORT", "0"),
            ("METRICS_ENABLED", "false"),
            ("BACKOFF_INITIAL_MS", "10"),
            ("BACKOFF_MAX_MS", "50"),
            ("SHUTDOWN_TIMEOUT_SECS", "5"),
        ]
        .into_iter()
        .collect();
        Config::from_lookup(|key| vars.get(key).map(|v| (*v).to_string()))
    }

    async fn start(
        transport: &InMemoryTransport,
        store: &InMemoryRecordStore,
    ) -> (Application, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let app = Application::assemble(
            listener,
            Arc::new(transport.clone()),
            Arc::new(store.clone()),
            PrometheusMetrics::disabled(),
            &test_config(),
        );
        let address = app.local_addr().unwrap();
        (app, address)
    }

    /// Minimal HTTP/1.1 GET returning the raw response text.
    async fn http_get(address: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(address).await.unwrap();
        let request =
            format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[test]
    fn test_kafka_transport_from_defaults() {
        let config = Config::from_lookup(|_| None);
        let transport = kafka_transport(&config.kafka).unwrap();

        assert_eq!(transport.brokers(), "kafka:29092");
        assert_eq!(transport.topic(), "todo-events");
    }

    #[test]
    fn test_amqp_transport_from_defaults() {
        let config = Config::from_lookup(|_| None);
        let transport = amqp_transport(&config.amqp).unwrap();

        assert_eq!(transport.queue(), "todo_events");
        assert_eq!(transport.describe(), "amqp://rabbitmq:5672/todo_events");
    }

    #[tokio::test]
    async fn test_unusable_collaborator_config_still_serves_http() {
        let config = Config::from_lookup(|key| match key {
            "HOST" => Some("127.0.0.1".to_string()),
            "PORT" => Some("0".to_string()),
            "METRICS_ENABLED" => Some("false".to_string()),
            "KAFKA_BROKERS" => Some(String::new()),
            "DATABASE_URL" => Some("not a database url".to_string()),
            "BACKOFF_INITIAL_MS" => Some("10".to_string()),
            "BACKOFF_MAX_MS" => Some("50".to_string()),
            _ => None,
        });

        let app = Application::build(&config)
            .await
            .expect("bad collaborator config must not stop startup");
        let address = app.local_addr().unwrap();
        let shutdown = app.shutdown_token();
        let running = tokio::spawn(app.run_until(std::future::pending()));

        let health = http_get(address, "/health").await;
        assert!(health.starts_with("HTTP/1.1 200"));

        let analytics = http_get(address, "/analytics/alice").await;
        assert!(analytics.starts_with("HTTP/1.1 503"));

        let ready = http_get(address, "/ready").await;
        assert!(ready.starts_with("HTTP/1.1 200"));
        assert!(!ready.contains(r#""transport":"connected""#));

        shutdown.cancel();
        running.await.unwrap().unwrap();
    }

    #[test]
    fn test_malformed_amqp_url_falls_back_to_unconfigured_transport() {
        let config = Config::from_lookup(|key| match key {
            "EVENT_TRANSPORT" => Some("amqp".to_string()),
            "RABBITMQ_URL" => Some("not a broker url".to_string()),
            _ => None,
        });

        assert!(amqp_transport(&config.amqp).is_err());
        assert_eq!(event_transport(&config).describe(), "unconfigured");
    }

    #[tokio::test]
    async fn test_bind_failure_is_an_error() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port().to_string();
        let config = Config::from_lookup(|key| match key {
            "HOST" => Some("127.0.0.1".to_string()),
            "PORT" => Some(port.clone()),
            "METRICS_ENABLED" => Some("false".to_string()),
            _ => None,
        });

        let result = Application::build(&config).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_serves_and_invalidates_end_to_end() {
        let transport = InMemoryTransport::new();
        let store = InMemoryRecordStore::new();
        store.set_counts("alice", 3, 2);

        let (app, address) = start(&transport, &store).await;
        let shutdown = app.shutdown_token();
        let cache = app.cache();
        let running = tokio::spawn(app.run_until(std::future::pending()));

        let health = http_get(address, "/health").await;
        assert!(health.starts_with("HTTP/1.1 200"));
        assert!(health.contains("Analytics Service"));

        let first = http_get(address, "/analytics/alice").await;
        assert!(first.to_ascii_lowercase().contains("x-cache: miss"));
        assert!(first.contains(r#""completed":3"#));
        assert!(cache.get("alice").is_some());

        store.set_counts("alice", 4, 1);
        transport.wait_until_sessions_opened(1).await;
        transport.publish_json(&json!({
            "eventType": "TODO_COMPLETED",
            "data": { "username": "alice", "completed": true }
        }));
        transport.wait_until_acked(1).await;
        assert!(cache.get("alice").is_none());

        let second = http_get(address, "/analytics/alice").await;
        assert!(second.to_ascii_lowercase().contains("x-cache: miss"));
        assert!(second.contains(r#""completed":4"#));

        shutdown.cancel();
        running.await.unwrap().unwrap();
        assert_eq!(transport.sessions_closed(), 1);
    }

    #[tokio::test]
    async fn test_http_keeps_serving_while_transport_is_down() {
        let transport = InMemoryTransport::new();
        transport.fail_next_dials(u32::MAX);
        let store = InMemoryRecordStore::new();
        store.set_counts("bob", 0, 1);

        let (app, address) = start(&transport, &store).await;
        let shutdown = app.shutdown_token();
        let running = tokio::spawn(app.run_until(std::future::pending()));

        let response = http_get(address, "/analytics/bob").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains(r#""pending":1"#));

        let ready = http_get(address, "/ready").await;
        assert!(ready.contains(r#""ready":true"#));

        shutdown.cancel();
        running.await.unwrap().unwrap();
        assert_eq!(transport.sessions_opened(), 0);
    }

    #[tokio::test]
    async fn test_external_signal_stops_the_application() {
        let transport = InMemoryTransport::new();
        let store = InMemoryRecordStore::new();
        let (app, _address) = start(&transport, &store).await;
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let running = tokio::spawn(app.run_until(async {
            let _ = rx.await;
        }));
        transport.wait_until_sessions_opened(1).await;
        tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .expect("application did not stop")
            .unwrap()
            .unwrap();
        assert_eq!(transport.sessions_closed(), 1);
    }
}
