use anyhow::{Context, Result};
use clap::Parser;
use homeproxy_relay::{router, AppState, RelayConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = RelayConfig::parse();

    let default_filter = if config.verbose {
        "homeproxy_relay=debug"
    } else {
        "homeproxy_relay=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    config.validate()?;

    let state = AppState::new(config.clone());
    let reaper = config
        .session_idle()
        .map(|idle| state.registry.spawn_reaper(idle, config.reap_interval()));

    let app = router(state);

    info!(
        "HomeProxy relay on {} (default system: {}, submit {}ms, poll {}s)",
        config.listen, config.default_system, config.submit_timeout_ms, config.poll_timeout_secs
    );

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(reaper) = reaper {
        reaper.abort();
    }
    info!("Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    info!("Shutting down...");
}
