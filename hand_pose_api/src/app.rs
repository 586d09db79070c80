use crate::{
    config::Config,
    pipeline::DetectionLimits,
    server::{build_router, HttpServer, SharedState},
    telemetry::Metrics,
};
use hand_landmarks::OrtHandDetector;
use std::sync::Arc;
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> anyhow::Result<()> {
    let detector = match OrtHandDetector::new(&config.model) {
        Ok(detector) => Arc::new(detector),
        Err(e) => {
            tracing::error!("Failed to initialize hand detector: {:?}", e);
            return Err(e.into());
        }
    };
    tracing::info!("Hand detector ready: {:?}", config.model.detector);

    let limits = DetectionLimits {
        decode: config.server.get_decode_limits(),
        timeout: config.server.get_request_timeout(),
        max_in_flight: config.model.num_instances,
    };
    let metrics = Arc::new(Metrics::new()?);
    let state = SharedState::new(detector.clone(), limits, metrics);

    let router = build_router(state, &config.cors)?;
    let server = HttpServer::new(router, &config.server.get_address()).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_handle = server.run(shutdown_tx.subscribe())?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    server_handle.await??;

    drop(detector);
    tracing::info!("Hand detector released");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
