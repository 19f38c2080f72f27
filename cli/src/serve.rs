use crate::services::Services;
use anyhow::Result;
use log::{error, info};
use tailrelay::{AppConfig, RelayMonitor};
use tokio_util::sync::CancellationToken;

/// Boot reconciliation, then supervise relays until Ctrl-C or SIGTERM.
pub async fn serve(config: &AppConfig) -> Result<()> {
    let services = Services::from_config(config);
    info!("Relay registry: {}", config.relays_file().display());
    info!("Proxy registry: {}", config.proxies_file().display());
    info!("Caddy admin API: {}", config.caddy_api_url());

    services.autostart().initialize().await;

    let token = CancellationToken::new();
    let monitor = RelayMonitor::new(services.supervisor.clone(), config.monitor_interval()).spawn(token.clone());

    wait_for_shutdown().await?;
    info!("Shutting down");

    token.cancel();
    if let Err(e) = monitor.await {
        error!("Relay monitor task failed: {}", e);
    }

    match services.supervisor.stop_all().await {
        Ok(report) => info!("Stopped {} relay(s), {} failed", report.succeeded, report.failed),
        Err(e) => error!("Failed to stop relays: {}", e),
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Received Ctrl+C");
        }
        _ = terminate.recv() => info!("Received SIGTERM"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C");
    Ok(())
}
