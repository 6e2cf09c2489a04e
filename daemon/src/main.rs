use anyhow::Result;
use leakwatch_daemon::{
    collector::LinuxSnapshotSource,
    config::Config,
    events::MonitorEvent,
    handler::MonitorHandler,
    protocol::Response,
    socket::{handle_client, SocketServer},
    Monitor,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Relay monitor events to connected socket clients as JSON lines.
async fn forward_events(
    mut events: broadcast::Receiver<MonitorEvent>,
    clients: broadcast::Sender<String>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let response = Response::from(event);
                match serde_json::to_string(&response) {
                    Ok(json) => {
                        let _ = clients.send(json);
                    }
                    Err(e) => error!("Failed to encode event: {}", e),
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Event relay lagging, skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    info!("LeakWatch daemon starting...");

    // Load configuration
    let config_path = Config::config_path();
    let config = if config_path.exists() {
        Config::load(&config_path).unwrap_or_else(|e| {
            warn!("Failed to load config: {}, using defaults", e);
            Config::default()
        })
    } else {
        info!("No config file found, using defaults");
        Config::default()
    };

    let monitor = Monitor::new(&config, Arc::new(LinuxSnapshotSource::new()))?;
    let info = monitor.system_info();
    info!(
        "Host {} ({} {}), {} cores, {} GB RAM",
        info.node, info.system, info.release, info.logical_cores, info.total_memory_gb
    );

    for &pid in &config.track {
        if let Err(e) = monitor.track(pid).await {
            warn!("Skipping configured PID: {}", e);
        }
    }

    // Create socket server
    let socket_path = SocketServer::socket_path();
    let server = SocketServer::bind(&socket_path, config.general.event_buffer).await?;

    let state = Arc::new(MonitorHandler::new(monitor));
    tokio::spawn(forward_events(
        state.monitor().subscribe(),
        server.broadcast_sender(),
    ));
    state.monitor().start().await;

    info!("Daemon ready, listening for connections...");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = server.accept() => match result {
                Ok(stream) => {
                    let state = Arc::clone(&state);
                    let broadcast_rx = server.broadcast_sender().subscribe();
                    tokio::spawn(async move {
                        handle_client(stream, broadcast_rx, state).await;
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            },
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    state.monitor().stop().await;
    Ok(())
}
