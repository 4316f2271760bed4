//! Multi-system manager
//!
//! Spawns one poller per configured home system, reconnecting after
//! relay errors, with graceful shutdown on Ctrl+C.

use crate::config::{HomeConfig, SystemConfig};
use crate::poller::HomePoller;
use anyhow::Result;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Manages the pollers for every configured system
pub struct PollerManager {
    config: HomeConfig,
    handles: Vec<JoinHandle<()>>,
}

impl PollerManager {
    pub fn new(config: HomeConfig) -> Self {
        Self {
            config,
            handles: Vec::new(),
        }
    }

    /// Start a poller for each system in the configuration
    pub fn start_all(&mut self) -> Result<()> {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║  🏠 HomeProxy                                                ║");
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║  Relay:      {:<47} ║", self.config.relay);

        let poll_timeout = Duration::from_secs(self.config.poll_timeout_secs);
        let retry_delay = Duration::from_secs(self.config.retry_delay_secs);

        for system in &self.config.systems {
            println!("║  {:<10}  {:<47} ║", system.name, system.upstream);
            let poller = HomePoller::new(&self.config.relay, system, poll_timeout)?;
            let handle = tokio::spawn(keep_polling(poller, system.clone(), retry_delay));
            self.handles.push(handle);
        }

        println!("╚══════════════════════════════════════════════════════════════╝\n");
        println!("Press Ctrl+C to stop\n");
        Ok(())
    }

    /// Wait for Ctrl+C, then stop every poller
    pub async fn wait_for_shutdown(self) {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down all pollers...");
        for handle in self.handles {
            handle.abort();
        }
        println!("\n✓ All pollers stopped.");
    }
}

async fn keep_polling(poller: HomePoller, system: SystemConfig, retry_delay: Duration) {
    loop {
        info!("Polling for '{}'", system.name);
        if let Err(e) = poller.run().await {
            error!("System '{}' error: {:#}. Reconnecting in {:?}...", system.name, e, retry_delay);
            tokio::time::sleep(retry_delay).await;
        }
    }
}
