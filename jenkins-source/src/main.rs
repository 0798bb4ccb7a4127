use anyhow::{Context, Result};
use buildstream::nats::{NatsClient, RecordPublisher};
use buildstream::offsets::SqliteOffsetStore;
use jenkins_source::api::{create_router, ApiState};
use jenkins_source::config::JenkinsSourceConfig;
use jenkins_source::connector::JenkinsSourceConnector;
use jenkins_source::jenkins::HttpJenkinsGateway;
use jenkins_source::manager::ConnectorManager;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jenkins_source=info,buildstream=info".into()),
        )
        .init();

    info!("Jenkins source starting...");

    // Config path: first argument, then environment, then default
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("JENKINS_SOURCE_CONFIG").ok())
        .unwrap_or_else(|| "jenkins-source.toml".to_string());

    let config = JenkinsSourceConfig::load(&config_path)?;

    info!(
        config = %config_path,
        jenkins = %config.jenkins.base_url,
        topic = %config.connector.topic,
        max_tasks = config.connector.max_tasks,
        offsets_db = %config.offsets.db_path,
        api_port = config.api.port,
        "Configuration loaded"
    );

    let gateway = Arc::new(
        HttpJenkinsGateway::new(&config.jenkins).context("Failed to build Jenkins client")?,
    );
    let connector = Arc::new(JenkinsSourceConnector::start(&config, gateway).await?);

    let store = Arc::new(
        SqliteOffsetStore::new(&config.offsets.db_path, connector.name())
            .context("Failed to initialize offset store")?,
    );
    info!("Offset store initialized");

    let nats = NatsClient::connect(config.nats.clone()).await?;
    let sink = Arc::new(RecordPublisher::new(
        nats.jetstream().clone(),
        config.nats.clone(),
    ));
    info!("NATS publisher initialized");

    let mut manager = ConnectorManager::new(Arc::clone(&connector), store, sink, &config.offsets);
    let started = manager.start().await?;
    info!(tasks_started = started, "Connector manager started");

    // Start HTTP status API
    let api_state = ApiState {
        connector_name: connector.name().to_string(),
        status_map: manager.status_map(),
    };
    let router = create_router(api_state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.api.port))
        .await
        .context("Failed to bind status API port")?;
    info!(port = config.api.port, "Status API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Status API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    // Graceful shutdown
    server_handle.abort();
    manager.shutdown().await;
    info!("Jenkins source stopped");

    Ok(())
}
