use std::{process, sync::Arc};

use sensor_relay::{
    broker,
    cli::Cli,
    config::Config,
    core::{
        controller::{Controller, ControllerSettings},
        delivery::DeliveryTracker,
        lifecycle::Lifecycle,
    },
    logger::LoggerManager,
    print_error,
    sensor::{self, SensorError},
};
use tracing::{debug, error, info};

/// Exit status when the sensor device is absent at startup.
const EXIT_SENSOR_NOT_FOUND: i32 = -1;

/// Resolves on SIGINT, or SIGTERM on Unix.
async fn termination_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse_or_exit();

    let cfg = Config::new(cli.config.as_deref(), &cli.overrides()).unwrap_or_else(|e| {
        print_error!("{}", e);
        process::exit(1);
    });

    let logger_manager = LoggerManager::new(cfg.logger.clone()).unwrap_or_else(|e| {
        print_error!("Failed to setup Log Manager: {}", e);
        process::exit(1);
    });
    logger_manager.init().unwrap_or_else(|e| {
        print_error!("Failed to init Log Manager: {}", e);
        process::exit(1);
    });

    info!("Starting sensor-relay version {}...", env!("CARGO_PKG_VERSION"));
    info!(
        "Broker: {} ({} transport), topic: {}",
        cfg.transport.address, cfg.transport.kind, cfg.transport.topic
    );
    info!("Log level: {}", cfg.logger.level);
    debug!("{:#?}", cfg);

    let sensor = match sensor::setup(&cfg.sensor).await {
        Ok(sensor) => sensor,
        Err(e @ SensorError::DeviceNotFound { .. }) => {
            error!("{}", e);
            process::exit(EXIT_SENSOR_NOT_FOUND);
        }
        Err(e) => {
            error!("Failed to set up sensor: {}", e);
            process::exit(1);
        }
    };

    let tracker = Arc::new(DeliveryTracker::new());
    let client = broker::connect(&cfg.transport, tracker.clone())
        .await
        .unwrap_or_else(|e| {
            error!("{}", e);
            process::exit(1);
        });
    info!("{} client ready", client.name());

    let lifecycle = Lifecycle::new();
    let controller = Controller::new(
        sensor,
        client,
        tracker,
        lifecycle.clone(),
        ControllerSettings::from_config(&cfg),
    );

    tokio::spawn(async move {
        termination_signal().await;
        lifecycle.request_shutdown();
    });

    let report = controller.run().await;
    if report.undelivered > 0 {
        debug!("Exiting with {} undelivered message(s)", report.undelivered);
    }
    info!("Shutdown complete");
}
