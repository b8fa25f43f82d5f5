use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use consentguard::config::Config;
use consentguard::logger;
use consentguard::services::{ConsentService, Stores};
use consentguard::SystemClock;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    logger::init_logger(&config)?;

    let stores = Stores::from_config(&config).await?;
    let service = ConsentService::new(stores, Arc::new(SystemClock), &config);

    let shutdown = CancellationToken::new();
    let sweeper = service
        .expiry_sweeper()
        .map(|sweeper| sweeper.spawn(shutdown.clone()));

    tracing::info!(
        emergency_hours = config.emergency_access_hours,
        full_consent_hours = config.default_full_consent_hours,
        sweep_interval_secs = config.sweep_interval_secs,
        "Consent engine started"
    );

    shutdown_signal().await;
    shutdown.cancel();
    if let Some(handle) = sweeper {
        handle.await?;
    }

    tracing::info!("Consent engine stopped");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
