//! VU Watchdog daemon.
//!
//! Per-host operations agent for a display-wall endpoint:
//! - Samples machine, network, and application health on independent cadences
//! - Publishes telemetry plus a bounded health summary to the message bus
//! - Accepts remote commands with idempotent, acknowledged execution
//! - Arbitrates exclusive operator control through a retained lease
//! - Supervises the WebRTC media engine and bridges its signaling over the bus

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vuwatchd::config::WatchdogConfig;
use vuwatchd::orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    setup_panic_hook();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "vuwatchd=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("[*]  VU Watchdog v{}", env!("CARGO_PKG_VERSION"));
    info!("[>]  Ops agent: telemetry, health, commands, stream signaling");

    let config = WatchdogConfig::load()?;
    info!("[*]  Wall id: {}", config.wall_id);

    orchestrator::run(config).await
}

fn setup_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };

        eprintln!();
        eprintln!("[!!!]  PANIC in VU Watchdog");
        eprintln!("[!!!]  Location: {}", location);
        eprintln!("[!!!]  Message: {}", message);
        eprintln!();

        default_hook(panic_info);
    }));
}
