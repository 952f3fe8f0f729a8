use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::prelude::*;
use zigbridge::api;
use zigbridge::config::Config;
use zigbridge::config::LogLevel;
use zigbridge::engine::Engine;
use zigbridge::event::EventBus;
use zigbridge::mqtt::MqttTransport;
use zigbridge::mqtt::RumqttcClient;
use zigbridge::registry::LocationId;
use zigbridge::registry::MemoryRegistry;
use zigbridge::service::ServiceControl;
use zigbridge::service::Systemctl;
use zigbridge::telemetry::LogSink;

#[derive(Parser, Debug)]
#[command(name = "zigbridge")]
#[command(about = "Keeps a device registry in sync with a zigbee2mqtt bridge")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(default_value = "zigbridge.toml")]
    config: PathBuf,

    /// Log level, replacing the one from the config file
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(config.logging.targets(args.log_level))
        .init();

    tracing::info!("zigbridge {} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!("Loaded config from: {}", args.config.display());

    let service = config
        .bridge
        .manage_service
        .then(|| Systemctl::new(config.bridge.service_unit.clone()));
    if let Some(service) = &service {
        if let Err(e) = service.start().await {
            tracing::error!("Failed to start bridge service: {}", e);
        }
    }

    let registry = MemoryRegistry::new(config.bridge.main_location.map(LocationId));
    let (engine, handle, outbound) = Engine::new(
        config.bridge_settings(),
        Box::new(registry),
        Box::new(LogSink),
        EventBus::new(),
    );
    let engine_task = tokio::spawn(engine.run());

    tracing::info!(
        "Connecting to MQTT broker at {}:{}",
        config.mqtt.broker,
        config.mqtt.port
    );
    let client = RumqttcClient::new(&config.mqtt).context("Failed to create MQTT client")?;
    let transport = MqttTransport::new(client, config.bridge_settings().topics)
        .start(handle.clone(), outbound)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start MQTT transport: {}", e))?;

    let mut api_shutdown = None;
    if config.api.enabled {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let (listen, port, engine) = (config.api.listen.clone(), config.api.port, handle.clone());
        api_shutdown = Some((
            tx,
            tokio::spawn(async move {
                if let Err(e) = api::serve(listen, port, engine, rx).await {
                    tracing::error!("HTTP API server failed: {}", e);
                }
            }),
        ));
    }

    tracing::info!("Press Ctrl+C to exit");
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received shutdown signal"),
        Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
    }

    if let Some((tx, task)) = api_shutdown {
        let _ = tx.send(());
        let _ = task.await;
    }

    // The engine stops once the transport and the last handle are gone.
    drop(transport);
    drop(handle);
    let bridge = engine_task.await.context("Engine task failed")?;
    tracing::info!("Engine stopped with {} devices", bridge.summary().devices);

    if let Some(service) = &service {
        if let Err(e) = service.stop().await {
            tracing::error!("Failed to stop bridge service: {}", e);
        }
    }

    tracing::info!("zigbridge shutdown complete");
    Ok(())
}
