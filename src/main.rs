use std::sync::Arc;

use anyhow::Result;
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hydro_telemetry_service::{
    api::{self, AppState},
    config::Config,
    control::ControlService,
    db,
    mqtt::MqttPublisher,
    sensors::{HttpSource, SensorService},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Missing .env is fine; variables may come from the environment.
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let store = db::connect(&config.store).await?;
    info!(backend = config.store.name(), "Store ready");

    let cancel = CancellationToken::new();

    let (publisher, mqtt_task) = MqttPublisher::connect(&config, cancel.clone());
    let control = ControlService::new(
        store.clone(),
        Arc::new(publisher),
        config.topic_namespace.clone(),
    );

    // Ingestion loop
    if config.sources.is_empty() {
        warn!("SENSOR_SOURCES is empty; every cycle will write no sensor data");
    }
    let ingestion = SensorService::new(
        store.clone(),
        Arc::new(HttpSource::new()?),
        config.sources.clone(),
        config.device_key.clone(),
        config.retry_delay,
    );
    let ingestion_task = tokio::spawn(ingestion.run(cancel.clone()));

    let state = AppState {
        store,
        control,
        device_key: config.device_key.clone(),
    };

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    let _ = tokio::join!(ingestion_task, mqtt_task);
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
