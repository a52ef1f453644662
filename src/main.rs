// main.rs
mod color;
mod config;
mod controller;
mod devices;
mod error;
mod models;
mod mqtt;
mod runloop;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = config::AppConfig::new()
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("stop signal received");
                stop.store(true, Ordering::Relaxed);
            }
        });
    }

    // The loop blocks on camera reads, so it lives on a blocking thread;
    // the runtime keeps driving the MQTT delivery task alongside it.
    let handle = tokio::runtime::Handle::current();
    tokio::task::spawn_blocking(move || runloop::run(settings, stop, handle)).await??;

    Ok(())
}
